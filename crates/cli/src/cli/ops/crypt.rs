use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Args, ValueEnum};

use common::crypto::{CipherError, ContentType, Plaintext, SealedCiphertext};
use common::escrow::EscrowError;
use sentinel_cli::AppError;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Bytes,
    Text,
    Json,
}

impl From<Format> for ContentType {
    fn from(format: Format) -> Self {
        match format {
            Format::Bytes => ContentType::Bytes,
            Format::Text => ContentType::Text,
            Format::Json => ContentType::Json,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct Encrypt {
    /// File to encrypt under the tenant's master secret
    pub file: PathBuf,

    /// How to treat the file contents
    #[arg(long, value_enum, default_value = "bytes")]
    pub format: Format,

    /// Write the sealed ciphertext here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct Decrypt {
    /// Sealed ciphertext produced by `encrypt`
    pub file: PathBuf,

    /// Write the plaintext here; binary plaintext is printed as base64 otherwise
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CryptError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} is not valid UTF-8")]
    NotText(PathBuf),
}

impl Encrypt {
    fn plaintext(&self, contents: Vec<u8>) -> Result<Plaintext, CryptError> {
        Ok(match self.format {
            Format::Bytes => Plaintext::Bytes(contents),
            Format::Text => Plaintext::Text(
                String::from_utf8(contents).map_err(|_| CryptError::NotText(self.file.clone()))?,
            ),
            Format::Json => Plaintext::Json(serde_json::from_slice(&contents)?),
        })
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Encrypt {
    type Error = CryptError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let plaintext = self.plaintext(tokio::fs::read(&self.file).await?)?;
        let (app, tenant) = ctx.open().await?;

        let sealed = app.escrow.encrypt_for(&tenant, plaintext).await?;
        let json = serde_json::to_string_pretty(&sealed)?;
        tracing::info!(
            "encrypted {} as {:?} for tenant {}",
            self.file.display(),
            ContentType::from(self.format),
            tenant
        );

        match &self.output {
            Some(path) => {
                tokio::fs::write(path, json).await?;
                Ok(format!("Wrote {}", path.display()))
            }
            None => Ok(json),
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Decrypt {
    type Error = CryptError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let raw = tokio::fs::read_to_string(&self.file).await?;
        let sealed: SealedCiphertext = serde_json::from_str(&raw)?;
        let (app, tenant) = ctx.open().await?;

        let plaintext = app.escrow.decrypt_for(&tenant, &sealed).await?;

        if let Some(path) = &self.output {
            tokio::fs::write(path, plaintext.into_bytes()?).await?;
            return Ok(format!("Wrote {}", path.display()));
        }
        Ok(match plaintext {
            Plaintext::Text(text) => text,
            Plaintext::Json(value) => serde_json::to_string_pretty(&value)?,
            Plaintext::Bytes(bytes) => STANDARD.encode(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt(format: Format) -> Encrypt {
        Encrypt {
            file: PathBuf::from("input"),
            format,
            output: None,
        }
    }

    #[test]
    fn test_plaintext_formats() {
        assert_eq!(
            encrypt(Format::Text).plaintext(b"hello".to_vec()).unwrap(),
            Plaintext::Text("hello".into())
        );
        assert_eq!(
            encrypt(Format::Json).plaintext(br#"{"a":1}"#.to_vec()).unwrap(),
            Plaintext::Json(serde_json::json!({"a": 1}))
        );
        assert!(matches!(
            encrypt(Format::Text).plaintext(vec![0xff, 0xfe]),
            Err(CryptError::NotText(_))
        ));
        assert!(matches!(
            encrypt(Format::Json).plaintext(b"not json".to_vec()),
            Err(CryptError::Json(_))
        ));
    }
}
