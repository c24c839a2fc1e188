//! Natural-language page automation.
//!
//! A command such as `search for lofi beats on youtube` is parsed into a
//! [`ParsedCommand`] by the [`CommandParser`] and executed against a
//! [`Page`] by the [`AutomationEngine`], which reports an [`ActionResult`].

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod page;
pub mod resolver;

pub use command::{
    Action, AiCommandParser, AutomationRequest, CommandParams, CommandParser, FormData,
    ParsedCommand, parse_form_data,
};
pub use config::{EngineConfig, LlmConfig};
pub use engine::{ActionResult, AutomationEngine, FieldOutcome, FieldStatus};
pub use error::{AutomationError, PageError};
pub use page::{ChromePage, MemoryPage, NodeRef, Page};
