pub mod container;
pub mod key;
pub mod pages;
pub mod script;
pub mod transform;
