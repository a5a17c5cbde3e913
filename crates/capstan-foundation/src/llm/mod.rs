//! Oracle access: retrying session with prompt memoisation, plus the
//! OpenAI-compatible adapter.

pub mod openai;
pub mod session;

pub use openai::OpenAiOracle;
pub use session::{extract_json, OracleSession};
