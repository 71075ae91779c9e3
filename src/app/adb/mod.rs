pub mod input;
pub mod link;
pub mod locator;
pub mod parse;
pub mod runner;
