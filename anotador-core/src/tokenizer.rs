//! # Tokenizador e Segmentador de Sentenças
//!
//! Usado apenas para montar um [`Document`](crate::model::Document) a partir de texto puro.
//! Documentos vindos de leitores de corpus (CCL, IOB, ...) já chegam tokenizados.
//!
//! - Sentenças: fronteiras Unicode (UAX #29) via `unicode-segmentation`.
//! - Tokens: palavras e pontuações separadas, preservando abreviações comuns
//!   ("Dr.", "prof.", "ul.") e números com ponto ("1.234").
//!
//! Cada token guarda seu offset de byte no texto original.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Um token: forma ortográfica imutável e posição no texto original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// Forma ortográfica (ex: "Jan", ",", "poszedł").
    pub orth: String,
    /// Byte inicial no texto original (inclusivo).
    #[serde(default)]
    pub start: usize,
    /// Byte final no texto original (exclusivo).
    #[serde(default)]
    pub end: usize,
    /// Posição do token dentro da sentença.
    #[serde(default)]
    pub index: usize,
}

impl Token {
    /// Token sem offsets (útil para documentos montados em código).
    pub fn new(orth: impl Into<String>, index: usize) -> Self {
        Self {
            orth: orth.into(),
            start: 0,
            end: 0,
            index,
        }
    }
}

/// Abreviações cujo ponto não encerra o token
const ABBREVIATIONS: &[&str] = &[
    "Dr", "Dra", "Sr", "Sra", "Prof", "Profa", "prof", "dr", "np", "tzn", "ul", "al",
    "im", "św", "gen", "mgr", "inż", "km", "cm", "kg", "etc", "art", "pág", "tel", "av",
];

/// Divide o texto em sentenças e tokeniza cada uma.
///
/// Os offsets dos tokens são relativos ao texto completo; o índice de cada token
/// é relativo à sua sentença. Sentenças sem tokens (só espaços) são descartadas.
pub fn split_sentences(text: &str) -> Vec<Vec<Token>> {
    text.split_sentence_bound_indices()
        .map(|(offset, sentence)| {
            let mut tokens = tokenize(sentence);
            for token in &mut tokens {
                token.start += offset;
                token.end += offset;
            }
            tokens
        })
        .filter(|tokens| !tokens.is_empty())
        .collect()
}

/// Tokeniza um trecho de texto (sem segmentar sentenças).
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current_start = 0;
    let mut current_text = String::new();
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for (i, &(byte_pos, ch)) in chars.iter().enumerate() {
        if ch.is_alphanumeric() || (ch == '-' && !current_text.is_empty()) {
            if current_text.is_empty() {
                current_start = byte_pos;
            }
            current_text.push(ch);
        } else if ch == '.' && !current_text.is_empty() {
            let is_abbrev = ABBREVIATIONS.contains(&current_text.as_str());
            let current_is_num = current_text.chars().all(char::is_numeric);
            let next_is_num = chars
                .get(i + 1)
                .map(|(_, c)| c.is_numeric())
                .unwrap_or(false);

            if is_abbrev || (current_is_num && next_is_num) {
                current_text.push('.');
            } else {
                flush_token(&mut tokens, &mut current_text, current_start, byte_pos);
                push_token(&mut tokens, ".".to_string(), byte_pos, byte_pos + 1);
            }
        } else if ch.is_whitespace() {
            flush_token(&mut tokens, &mut current_text, current_start, byte_pos);
        } else {
            flush_token(&mut tokens, &mut current_text, current_start, byte_pos);
            push_token(&mut tokens, ch.to_string(), byte_pos, byte_pos + ch.len_utf8());
        }
    }
    flush_token(&mut tokens, &mut current_text, current_start, text.len());

    for (i, token) in tokens.iter_mut().enumerate() {
        token.index = i;
    }
    tokens
}

/// Fecha o token acumulado (se não vazio)
fn flush_token(tokens: &mut Vec<Token>, text: &mut String, start: usize, end: usize) {
    if !text.is_empty() {
        tokens.push(Token {
            orth: text.clone(),
            start,
            end,
            index: 0,
        });
        text.clear();
    }
}

fn push_token(tokens: &mut Vec<Token>, orth: String, start: usize, end: usize) {
    tokens.push(Token {
        orth,
        start,
        end,
        index: 0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("Jan poszedł do szkoły.");
        let orths: Vec<&str> = tokens.iter().map(|t| t.orth.as_str()).collect();
        assert_eq!(orths, vec!["Jan", "poszedł", "do", "szkoły", "."]);
        assert_eq!(tokens[4].index, 4);
    }

    #[test]
    fn test_tokenize_keeps_abbreviation_and_numbers() {
        let tokens = tokenize("Dr. Silva pagou 1.234 reais");
        let orths: Vec<&str> = tokens.iter().map(|t| t.orth.as_str()).collect();
        assert_eq!(orths, vec!["Dr.", "Silva", "pagou", "1.234", "reais"]);
    }

    #[test]
    fn test_offsets_point_into_text() {
        let text = "Ala ma kota.";
        for token in tokenize(text) {
            assert_eq!(&text[token.start..token.end], token.orth);
        }
    }

    #[test]
    fn test_split_sentences_offsets() {
        let text = "Jan poszedł do szkoły. Tam spotkał Marię.";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 2);
        let second = &sentences[1];
        assert_eq!(second[0].orth, "Tam");
        assert_eq!(second[0].index, 0);
        assert_eq!(&text[second[0].start..second[0].end], "Tam");
    }

    #[test]
    fn test_empty_text() {
        assert!(split_sentences("   ").is_empty());
        assert!(tokenize("").is_empty());
    }
}
