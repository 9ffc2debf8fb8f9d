//! Context window budgeting and prompt assembly.
//!
//! Everything a generation request needs before it touches the network:
//! approximate token counting, sentence-bounded trimming, dividing one fixed
//! context budget between editor text and fetched references, and composing
//! the final prompt envelope.

pub mod budget;
pub mod prompt;
pub mod sentence;
pub mod token_counter;

pub use budget::{Allocation, BudgetAllocator};
pub use prompt::PromptAssembler;
pub use sentence::{Keep, trim_to_token_budget};
pub use token_counter::TokenCounter;
