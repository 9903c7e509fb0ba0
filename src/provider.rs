use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// AI vendors a credential can be linked for.
///
/// `Gemini` is the primary provider: it may resolve from the local flag cache or the
/// deployment-wide fallback credential. Every other provider is a strictly per-user secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    Perplexity,
    Others,
}

impl Provider {
    pub const PRIMARY: Provider = Provider::Gemini;

    pub const ALL: [Provider; 4] = [
        Provider::Gemini,
        Provider::OpenAi,
        Provider::Perplexity,
        Provider::Others,
    ];

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Perplexity => "perplexity",
            Provider::Others => "others",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown provider '{}'", raw.trim()))
    }
}
