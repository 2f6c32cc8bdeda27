use std::fmt;

/// Identifies one fixed-size block within a named file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    filename: String,
    number: u64,
}

impl BlockId {
    pub fn new(filename: impl Into<String>, number: u64) -> Self {
        Self {
            filename: filename.into(),
            number,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

// The number never contains '.', so the text after the last '.' is always the
// block number even when the filename has dots of its own.
impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.filename, self.number)
    }
}
