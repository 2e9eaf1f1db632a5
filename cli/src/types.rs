use region_vault_core::ErrorKind;
use serde::Serialize;

/// Salt, IV and size of a blob, as reported by `inspect`
#[derive(Serialize, Debug)]
pub struct HeaderReport {
    /// Base64 salt
    pub salt: String,

    /// Base64 IV
    pub iv: String,

    pub ciphertext_len: usize,

    /// Whether the ciphertext is a whole number of cipher blocks
    pub block_aligned: bool,
}

/// One `self-test` check
#[derive(Serialize, Debug)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Structured output for JSON mode
#[derive(Serialize, Debug, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plaintext_len: Option<usize>,
    /// Base64 plaintext, only when `open --json` has no output file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<CheckResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl CommandOutput {
    /// A successful result carrying only a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    /// A failed result built from an error chain
    pub fn failure(err: &anyhow::Error) -> Self {
        let error_kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<region_vault_core::RegionError>())
            .map(|region_err| region_err.kind());

        Self {
            success: false,
            message: err.to_string(),
            error: Some(format!("{:#}", err)),
            error_kind,
            ..Self::default()
        }
    }
}
