use unicode_segmentation::UnicodeSegmentation;

/// One normalized token produced by an analyzer. Position and char offset
/// are relative to a single attribute value; the indexer applies the
/// multi-valued position bump between values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: u32,
    pub char_offset: u32,
    /// Set when the analyzer emitted this token as a synonym expansion;
    /// carries the character length of the original surface form.
    pub synonym_original_len: Option<u32>,
}

impl Token {
    pub fn new(text: impl Into<String>, position: u32, char_offset: u32) -> Self {
        Token { text: text.into(), position, char_offset, synonym_original_len: None }
    }

    pub fn is_synonym(&self) -> bool {
        self.synonym_original_len.is_some()
    }
}

/// The tokenizer/stemmer/synonym chain lives outside the engine; this is
/// the seam it plugs into.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;
}

/// Unicode word splitting plus lowercasing. The default chain used by the
/// demos and tests.
#[derive(Debug, Clone)]
pub struct StandardAnalyzer {
    pub max_token_chars: usize,
}

impl Default for StandardAnalyzer {
    fn default() -> Self {
        StandardAnalyzer { max_token_chars: 255 }
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for (byte_offset, word) in text.unicode_word_indices() {
            if word.chars().count() > self.max_token_chars {
                continue;
            }
            let char_offset = text[..byte_offset].chars().count() as u32;
            tokens.push(Token::new(word.to_lowercase(), position, char_offset));
            position += 1;
        }

        tokens
    }

    fn name(&self) -> &str {
        "standard"
    }
}
