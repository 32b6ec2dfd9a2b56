pub mod list_cmd;
pub mod parsers;
pub mod run_cmd;
pub mod token_cmd;
