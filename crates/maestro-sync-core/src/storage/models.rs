/// A file with a committed library element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFile {
    pub element_id: i64,
    pub url: String,
    pub hash: Option<String>,
    pub verified: i64,
}

/// A file found on disk that has no library element yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub url: String,
    pub hash: Option<String>,
    pub verified: i64,
}

/// Hash/verification update for a known file, keyed by element id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHashUpdate {
    pub element_id: i64,
    pub hash: Option<String>,
    pub verified: i64,
}

/// Hash/verification update for a candidate, keyed by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHashUpdate {
    pub url: String,
    pub hash: Option<String>,
    pub verified: i64,
}
