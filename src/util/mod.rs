//! Leaf actions built on the action contract

pub mod condition;
pub mod delay;
pub mod function;

pub use condition::{branch, branch_async, valid, valid_async, Branch, Branches, Predicate, Valid};
pub use delay::{delay, Delay};
pub use function::{from_fn, FnAction};
