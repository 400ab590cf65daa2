//! # Armazém de Atributos por Sentença
//!
//! Cada sentença guarda os atributos dos seus tokens (ex: `orth`, `base`, `case`, `number`)
//! em colunas: um índice inteiro por nome de atributo e, para cada índice, um vetor com um
//! valor por token.
//!
//! ```text
//!            token 0   token 1    token 2
//! orth  (0)  "Jan"     "poszedł"  "do"
//! base  (1)  "Jan"     "pójść"    "do"
//! case  (2)  "nom"     -          -
//! ```
//!
//! O índice de um nome é estável durante toda a vida da sentença e só cresce (append-only).
//! Loops quentes (extração de features) resolvem o índice uma vez e depois usam apenas o
//! inteiro; chamadas avulsas podem usar o nome diretamente.
//!
//! Ler um atributo nunca registrado **não** é erro: retorna `None`. Ausência é um resultado
//! comum e legítimo na engenharia de features.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AnotadorError, Result};

/// Chave de acesso a um atributo: índice pré-resolvido ou nome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for AttributeKey<'_> {
    fn from(index: usize) -> Self {
        AttributeKey::Index(index)
    }
}

impl<'a> From<&'a str> for AttributeKey<'a> {
    fn from(name: &'a str) -> Self {
        AttributeKey::Name(name)
    }
}

impl<'a> From<&'a String> for AttributeKey<'a> {
    fn from(name: &'a String) -> Self {
        AttributeKey::Name(name.as_str())
    }
}

/// Tabela colunar de atributos dos tokens de uma sentença.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawAttributeStore")]
pub struct AttributeStore {
    names: Vec<String>,
    token_count: usize,
    /// `columns[atributo][token]`
    columns: Vec<Vec<Option<String>>>,
    #[serde(skip_serializing)]
    lookup: HashMap<String, usize>,
}

/// Forma serializada; o mapa nome → índice é reconstruído na desserialização.
#[derive(Deserialize)]
struct RawAttributeStore {
    names: Vec<String>,
    token_count: usize,
    #[serde(default)]
    columns: Vec<Vec<Option<String>>>,
}

impl From<RawAttributeStore> for AttributeStore {
    fn from(raw: RawAttributeStore) -> Self {
        let mut store = AttributeStore::new(raw.token_count);
        let mut columns = raw.columns.into_iter();
        for name in raw.names {
            let index = store.index(&name);
            if let Some(mut column) = columns.next() {
                column.resize(raw.token_count, None);
                store.columns[index] = column;
            }
        }
        store
    }
}

impl AttributeStore {
    pub fn new(token_count: usize) -> Self {
        Self {
            names: Vec::new(),
            token_count,
            columns: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Número de tokens cobertos por esta tabela.
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Número de atributos registrados.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Retorna o índice do atributo, criando-o no primeiro uso.
    pub fn index(&mut self, name: &str) -> usize {
        if let Some(&index) = self.lookup.get(name) {
            return index;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.columns.push(vec![None; self.token_count]);
        self.lookup.insert(name.to_string(), index);
        index
    }

    /// Consulta o índice sem registrar o nome.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Nome associado a um índice.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    fn resolve(&self, key: AttributeKey<'_>) -> Option<usize> {
        match key {
            AttributeKey::Index(index) if index < self.names.len() => Some(index),
            AttributeKey::Index(_) => None,
            AttributeKey::Name(name) => self.lookup(name),
        }
    }

    /// Lê o valor de um atributo de um token.
    ///
    /// Retorna `None` para atributos nunca registrados, índices desconhecidos,
    /// tokens fora da sentença ou valores não preenchidos.
    pub fn get<'k>(&self, token: usize, key: impl Into<AttributeKey<'k>>) -> Option<&str> {
        let index = self.resolve(key.into())?;
        self.columns[index].get(token)?.as_deref()
    }

    /// Grava o valor de um atributo de um token e retorna o índice usado.
    ///
    /// Com uma chave por nome, o atributo é registrado se ainda não existir.
    /// Com uma chave por índice, o índice precisa ter sido criado antes.
    pub fn set<'k>(
        &mut self,
        token: usize,
        key: impl Into<AttributeKey<'k>>,
        value: impl Into<String>,
    ) -> Result<usize> {
        if token >= self.token_count {
            return Err(AnotadorError::invalid_document(format!(
                "token {token} fora da sentença ({} tokens)",
                self.token_count
            )));
        }
        let index = match key.into() {
            AttributeKey::Name(name) => self.index(name),
            AttributeKey::Index(index) if index < self.names.len() => index,
            AttributeKey::Index(index) => {
                return Err(AnotadorError::config(format!(
                    "índice de atributo {index} não registrado"
                )))
            }
        };
        self.columns[index][token] = Some(value.into());
        Ok(index)
    }

    /// Remove o valor de um atributo de um token (o índice permanece registrado).
    pub fn clear<'k>(&mut self, token: usize, key: impl Into<AttributeKey<'k>>) {
        if let Some(index) = self.resolve(key.into()) {
            if let Some(slot) = self.columns[index].get_mut(token) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_stable() {
        let mut store = AttributeStore::new(3);
        let case = store.index("case");
        let base = store.index("base");
        assert_eq!(store.index("case"), case);
        assert_ne!(case, base);
        assert_eq!(store.lookup("base"), Some(base));
        assert_eq!(store.name(case), Some("case"));
    }

    #[test]
    fn test_read_by_name_or_index() {
        let mut store = AttributeStore::new(4);
        let index = store.set(1, "case", "nom").unwrap();
        assert_eq!(store.get(1, "case"), Some("nom"));
        assert_eq!(store.get(1, index), Some("nom"));
        assert_eq!(store.get(0, index), None);
    }

    #[test]
    fn test_unknown_attribute_is_absent() {
        let store = AttributeStore::new(2);
        assert_eq!(store.get(0, "number"), None);
        assert_eq!(store.get(0, 7usize), None);
        assert_eq!(store.get(9, "number"), None);
        assert_eq!(store.lookup("number"), None);
    }

    #[test]
    fn test_set_rejects_bad_token_and_index() {
        let mut store = AttributeStore::new(2);
        assert!(store.set(2, "orth", "x").is_err());
        assert!(store.set(0, 3usize, "x").is_err());
    }

    #[test]
    fn test_clear_keeps_index() {
        let mut store = AttributeStore::new(1);
        let index = store.set(0, "base", "iść").unwrap();
        store.clear(0, "base");
        assert_eq!(store.get(0, index), None);
        assert_eq!(store.lookup("base"), Some(index));
    }

    #[test]
    fn test_serde_rebuilds_lookup() {
        let mut store = AttributeStore::new(2);
        store.set(0, "orth", "Jan").unwrap();
        store.set(1, "case", "gen").unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let back: AttributeStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(0, "orth"), Some("Jan"));
        assert_eq!(back.lookup("case"), Some(1));
    }
}
