pub mod check;
pub mod policy;
pub mod scope;
pub mod serve;
