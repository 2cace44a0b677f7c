//! Text tokenisation and stemming for text-typed fields.

use crate::spc::StemStrategy;
use rust_stemmers::{Algorithm, Stemmer};

/// Split into word tokens, lowercasing unless the field is verbatim.
pub fn tokenize(text: &str, lowercase: bool) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| {
            if lowercase {
                w.to_lowercase()
            } else {
                w.to_string()
            }
        })
        .collect()
}

/// Stemming algorithm for a language tag, if one is available.
pub fn algorithm_for(language: &str) -> Option<Algorithm> {
    Some(match language {
        "ar" | "arabic" => Algorithm::Arabic,
        "da" | "danish" => Algorithm::Danish,
        "nl" | "dutch" => Algorithm::Dutch,
        "en" | "english" => Algorithm::English,
        "fi" | "finnish" => Algorithm::Finnish,
        "fr" | "french" => Algorithm::French,
        "de" | "german" => Algorithm::German,
        "el" | "greek" => Algorithm::Greek,
        "hu" | "hungarian" => Algorithm::Hungarian,
        "it" | "italian" => Algorithm::Italian,
        "no" | "norwegian" => Algorithm::Norwegian,
        "pt" | "portuguese" => Algorithm::Portuguese,
        "ro" | "romanian" => Algorithm::Romanian,
        "ru" | "russian" => Algorithm::Russian,
        "es" | "spanish" => Algorithm::Spanish,
        "sv" | "swedish" => Algorithm::Swedish,
        "ta" | "tamil" => Algorithm::Tamil,
        "tr" | "turkish" => Algorithm::Turkish,
        _ => return None,
    })
}

/// A single token's indexed spellings under a stemming strategy.
///
/// Stemmed forms carry a `Z` byte so they never collide with verbatim
/// words.
pub fn term_forms(word: &str, stem_language: &str, strategy: StemStrategy) -> Vec<Vec<u8>> {
    let stem = || -> Option<Vec<u8>> {
        let algorithm = algorithm_for(stem_language)?;
        let stemmed = Stemmer::create(algorithm).stem(word).to_string();
        let mut out = Vec::with_capacity(stemmed.len() + 1);
        out.push(b'Z');
        out.extend_from_slice(stemmed.as_bytes());
        Some(out)
    };
    match strategy {
        StemStrategy::StemNone => vec![word.as_bytes().to_vec()],
        StemStrategy::StemSome => {
            let mut forms = vec![word.as_bytes().to_vec()];
            if let Some(stemmed) = stem() {
                forms.push(stemmed);
            }
            forms
        }
        StemStrategy::StemAll => {
            let algorithm = algorithm_for(stem_language);
            match algorithm {
                Some(a) => vec![Stemmer::create(a).stem(word).to_string().into_bytes()],
                None => vec![word.as_bytes().to_vec()],
            }
        }
        StemStrategy::StemAllZ => match stem() {
            Some(stemmed) => vec![stemmed],
            None => vec![word.as_bytes().to_vec()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Ana, Maria!", true), vec!["ana", "maria"]);
        assert_eq!(tokenize("Ana", false), vec!["Ana"]);
        assert!(tokenize("  ", true).is_empty());
    }

    #[test]
    fn test_stem_some_keeps_verbatim() {
        let forms = term_forms("running", "en", StemStrategy::StemSome);
        assert_eq!(forms[0], b"running".to_vec());
        assert_eq!(forms[1], b"Zrun".to_vec());
    }

    #[test]
    fn test_stem_none() {
        let forms = term_forms("running", "en", StemStrategy::StemNone);
        assert_eq!(forms, vec![b"running".to_vec()]);
    }

    #[test]
    fn test_unknown_language_skips_stemming() {
        let forms = term_forms("running", "xx", StemStrategy::StemSome);
        assert_eq!(forms, vec![b"running".to_vec()]);
    }
}
