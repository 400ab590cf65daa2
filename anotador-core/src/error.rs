//! # Erros do Anotador
//!
//! Os erros seguem três níveis de gravidade:
//!
//! - **Configuração** (`Config`, `UnknownFeature`): fatais na inicialização, nenhuma execução parcial.
//! - **Documento** (`InvalidDocument`, `Timeout`): o documento é rejeitado como unidade;
//!   os demais documentos de um lote não são afetados.
//! - **Menção** (`Classifier`): recuperados localmente pelo resolvedor, que deixa a menção
//!   sem resolução e segue para a próxima.

use thiserror::Error;

/// Resultado padrão das operações do crate.
pub type Result<T> = std::result::Result<T, AnotadorError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AnotadorError {
    /// Configuração inválida (categoria desconhecida, chunker inexistente, etc.).
    #[error("Erro de configuração: {0}")]
    Config(String),

    /// Feature referenciada pelo nome, mas não registrada.
    #[error("Feature desconhecida: {0}")]
    UnknownFeature(String),

    /// Documento que viola os invariantes do modelo de spans.
    #[error("Documento inválido: {0}")]
    InvalidDocument(String),

    /// Falha do classificador externo (resposta ausente ou de tamanho inesperado).
    #[error("Erro do classificador: {0}")]
    Classifier(String),

    /// O documento excedeu o prazo de processamento; nenhuma relação foi gravada.
    #[error("Tempo esgotado após {elapsed_ms} ms (limite {limit_ms} ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("Erro de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Erro de JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Padrão regex inválido: {0}")]
    Regex(#[from] regex::Error),
}

impl AnotadorError {
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    #[must_use]
    pub fn invalid_document(msg: impl Into<String>) -> Self {
        Self::InvalidDocument(msg.into())
    }

    #[must_use]
    pub fn classifier(msg: impl Into<String>) -> Self {
        Self::Classifier(msg.into())
    }

    /// Indica se o erro invalida apenas o documento corrente (e não a configuração).
    pub fn is_document_level(&self) -> bool {
        matches!(self, Self::InvalidDocument(_) | Self::Timeout { .. })
    }
}
