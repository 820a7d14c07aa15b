//! Tree entry modes
//!
//! Git restricts tree entry modes to a fixed set. The canonical serialized
//! form has no leading zero for directories (`40000`, not `040000`), which
//! matters for hash stability; parsing accepts both spellings.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryMode {
    /// Regular file (100644)
    #[default]
    Regular,
    /// Executable file (100755)
    Executable,
    /// Symbolic link (120000)
    Symlink,
    /// Commit reference inside a tree, i.e. a submodule (160000)
    Gitlink,
    /// Subdirectory (40000)
    Directory,
}

impl EntryMode {
    /// Canonical octal spelling as emitted inside tree objects
    pub fn as_str(&self) -> &str {
        match self {
            EntryMode::Regular => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Gitlink => "160000",
            EntryMode::Directory => "40000",
        }
    }

    pub fn from_octal_str(mode: &str) -> anyhow::Result<Self> {
        match mode {
            "100644" | "644" => Ok(EntryMode::Regular),
            "100755" | "755" => Ok(EntryMode::Executable),
            "120000" => Ok(EntryMode::Symlink),
            "160000" => Ok(EntryMode::Gitlink),
            "40000" | "040000" => Ok(EntryMode::Directory),
            _ => Err(anyhow::anyhow!("Invalid tree entry mode: {}", mode)),
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Directory)
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
