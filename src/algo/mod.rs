pub mod aggregate;
pub mod categories;
pub mod sparse;
pub mod topk;
pub mod words;
