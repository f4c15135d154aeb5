use serde::{Deserialize, Serialize};

/// Supported model families, selected by name at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Gemma,
    Mistral,
    Qwen,
}

impl DialectKind {
    pub const ALL: [DialectKind; 3] = [DialectKind::Gemma, DialectKind::Mistral, DialectKind::Qwen];

    pub fn as_str(self) -> &'static str {
        match self {
            DialectKind::Gemma => "gemma",
            DialectKind::Mistral => "mistral",
            DialectKind::Qwen => "qwen",
        }
    }
}

impl std::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown dialect {s:?} (expected one of: gemma, mistral, qwen)"))
    }
}
