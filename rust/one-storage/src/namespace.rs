/// The six record namespaces of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Canonical textual records, named by content hash.
    Objects,
    /// Raw binary blobs, named by content hash.
    Blobs,
    /// Raw UTF-8 clobs, named by content hash.
    Clobs,
    /// Per-identity version maps (line-structured, append-only).
    VersionMaps,
    /// Per-target reverse maps (line-structured, append-only).
    ReverseMaps,
    /// The single-consumer private area; always encrypted.
    Private,
}

impl Namespace {
    /// Every namespace, in a fixed order.
    pub const ALL: [Namespace; 6] = [
        Namespace::Objects,
        Namespace::Blobs,
        Namespace::Clobs,
        Namespace::VersionMaps,
        Namespace::ReverseMaps,
        Namespace::Private,
    ];

    /// The directory name of the namespace inside an instance.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::Objects => "objects",
            Namespace::Blobs => "blobs",
            Namespace::Clobs => "clobs",
            Namespace::VersionMaps => "vmaps",
            Namespace::ReverseMaps => "rmaps",
            Namespace::Private => "private",
        }
    }

    /// Whether plaintext records in this namespace are text.
    ///
    /// Only blobs hold raw binary; everything else is UTF-8 (canonical
    /// records and line-structured maps).
    pub fn holds_text(&self) -> bool {
        !matches!(self, Namespace::Blobs)
    }

    /// Whether the namespace supports `append` and `write_overwrite`.
    pub fn is_map(&self) -> bool {
        matches!(self, Namespace::VersionMaps | Namespace::ReverseMaps)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Whether a write created the record or found it already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The record did not exist before this write.
    New,
    /// The record already existed; nothing was written.
    AlreadyExisted,
}
