pub mod billing;
pub mod openai;
pub mod reliable;

pub mod mock;

pub use billing::OpenAiBilling;
pub use mock::{MockBilling, MockReply, MockSummarizer, MockTransport};
pub use openai::OpenAiClient;
pub use reliable::{Reliable, ReliableConfig};
