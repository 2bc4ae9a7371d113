pub mod folders;
pub mod inspect;
pub mod list;
pub mod run;
