//! SQL text construction: quoting, clause and statement builders.

pub mod command_builder;
pub mod condition;
pub mod syntax;

pub use command_builder::CommandBuilder;
pub use condition::ConditionBuilder;
pub use syntax::SqlSyntax;
