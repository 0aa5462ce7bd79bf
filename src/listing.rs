//! Decoding of the flat name buffer filled by [`crate::token::Token::list`].

/// Names decoded from a listing buffer, in buffer order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    names: Vec<String>,
}

impl DirectoryListing {
    /// Decode `total_len` bytes of NUL-terminated names from `raw`.
    ///
    /// `total_len` comes from the token and is not trusted: it is clamped to
    /// the buffer, and a name whose terminator would fall outside the
    /// remaining count ends the parse.
    pub fn parse(raw: &[u8], total_len: usize) -> Self {
        let mut remaining = total_len.min(raw.len());
        if remaining < total_len {
            tracing::warn!(total_len, buffer = raw.len(), "listing length exceeds buffer");
        }
        let mut names = Vec::new();
        let mut pos = 0;
        while remaining > 0 {
            let window = &raw[pos..pos + remaining];
            let Some(len) = window.iter().position(|b| *b == 0) else {
                tracing::warn!(offset = pos, "unterminated name in listing");
                break;
            };
            names.push(String::from_utf8_lossy(&window[..len]).into_owned());
            remaining -= len + 1;
            pos += len + 1;
        }
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl IntoIterator for DirectoryListing {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.into_iter()
    }
}
