use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// =============================================================================
// Intent Kinds
// =============================================================================

/// Kind of action an intent asks for.
///
/// Known kinds carry a parameter schema (see [`IntentKind::schema`]) so that
/// fusion rules and checkpoint contracts are checked against a single
/// registry. Anything the recognizer or the LLM emits that is not in the
/// catalog is preserved as [`IntentKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntentKind {
    // File operations
    CreateFile,
    WriteFile,
    ReadFile,
    EditFile,
    DeleteFile,
    FormatCode,

    // Version control
    GitAdd,
    GitCommit,
    GitPush,

    // Build pipeline
    BuildProject,
    RunTests,
    InstallDependencies,

    // Media
    CompressImage,

    // Data
    QueryDatabase,
    ExportData,
    GenerateReport,
    SendEmail,
    Search,

    // Heavy reasoning
    AnalyzeCode,
    RefactorCode,
    SecurityScan,
    OptimizePerformance,
    ReviewArchitecture,
    MigrateSchema,

    // Compound kinds produced by fusion
    CreateAndWriteFile,
    ReadAndEditFile,
    WriteAndFormatFile,
    GitAddAndCommit,
    GitCommitAndPush,
    GitAddCommitPush,
    BuildAndTest,
    BatchCreateFiles,
    BatchDeleteFiles,
    BatchReadFiles,
    BatchCompressImages,
    ChainedTask,

    /// Classifier could not tell what the user wants.
    Unknown,

    /// Kind outside the catalog, kept verbatim.
    Other(String),
}

/// Parameter contract of an intent kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSchema {
    /// Parameters the action needs as input.
    pub required: &'static [&'static str],
    /// Fields a successful execution reports back.
    pub outputs: &'static [&'static str],
}

impl ParamSchema {
    const fn new(required: &'static [&'static str], outputs: &'static [&'static str]) -> Self {
        Self { required, outputs }
    }
}

/// How a homogeneous run of one kind collapses into a batch kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDimension {
    /// Parameter name carrying the list of per-item targets.
    pub collection: &'static str,
    /// Keys that vary per item and move into the collection.
    pub item_keys: &'static [&'static str],
}

const KNOWN: &[(IntentKind, &str)] = &[
    (IntentKind::CreateFile, "CREATE_FILE"),
    (IntentKind::WriteFile, "WRITE_FILE"),
    (IntentKind::ReadFile, "READ_FILE"),
    (IntentKind::EditFile, "EDIT_FILE"),
    (IntentKind::DeleteFile, "DELETE_FILE"),
    (IntentKind::FormatCode, "FORMAT_CODE"),
    (IntentKind::GitAdd, "GIT_ADD"),
    (IntentKind::GitCommit, "GIT_COMMIT"),
    (IntentKind::GitPush, "GIT_PUSH"),
    (IntentKind::BuildProject, "BUILD_PROJECT"),
    (IntentKind::RunTests, "RUN_TESTS"),
    (IntentKind::InstallDependencies, "INSTALL_DEPENDENCIES"),
    (IntentKind::CompressImage, "COMPRESS_IMAGE"),
    (IntentKind::QueryDatabase, "QUERY_DATABASE"),
    (IntentKind::ExportData, "EXPORT_DATA"),
    (IntentKind::GenerateReport, "GENERATE_REPORT"),
    (IntentKind::SendEmail, "SEND_EMAIL"),
    (IntentKind::Search, "SEARCH"),
    (IntentKind::AnalyzeCode, "ANALYZE_CODE"),
    (IntentKind::RefactorCode, "REFACTOR_CODE"),
    (IntentKind::SecurityScan, "SECURITY_SCAN"),
    (IntentKind::OptimizePerformance, "OPTIMIZE_PERFORMANCE"),
    (IntentKind::ReviewArchitecture, "REVIEW_ARCHITECTURE"),
    (IntentKind::MigrateSchema, "MIGRATE_SCHEMA"),
    (IntentKind::CreateAndWriteFile, "CREATE_AND_WRITE_FILE"),
    (IntentKind::ReadAndEditFile, "READ_AND_EDIT_FILE"),
    (IntentKind::WriteAndFormatFile, "WRITE_AND_FORMAT_FILE"),
    (IntentKind::GitAddAndCommit, "GIT_ADD_AND_COMMIT"),
    (IntentKind::GitCommitAndPush, "GIT_COMMIT_AND_PUSH"),
    (IntentKind::GitAddCommitPush, "GIT_ADD_COMMIT_PUSH"),
    (IntentKind::BuildAndTest, "BUILD_AND_TEST"),
    (IntentKind::BatchCreateFiles, "BATCH_CREATE_FILES"),
    (IntentKind::BatchDeleteFiles, "BATCH_DELETE_FILES"),
    (IntentKind::BatchReadFiles, "BATCH_READ_FILES"),
    (IntentKind::BatchCompressImages, "BATCH_COMPRESS_IMAGES"),
    (IntentKind::ChainedTask, "CHAINED_TASK"),
    (IntentKind::Unknown, "UNKNOWN"),
];

impl IntentKind {
    /// Canonical SCREAMING_SNAKE name.
    pub fn as_str(&self) -> &str {
        if let Self::Other(name) = self {
            return name;
        }
        KNOWN
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Parse a kind name; unknown names are preserved as `Other`.
    ///
    /// Accepts any case and `-`/space separators (`create-file`, `Create File`).
    pub fn from_name(name: &str) -> Self {
        let normalized = name.trim().to_uppercase().replace(['-', ' '], "_");
        if normalized.is_empty() {
            return Self::Unknown;
        }
        KNOWN
            .iter()
            .find(|(_, known)| *known == normalized)
            .map(|(kind, _)| kind.clone())
            .unwrap_or(Self::Other(normalized))
    }

    /// Parameter schema registry.
    pub fn schema(&self) -> ParamSchema {
        use IntentKind::*;
        match self {
            CreateFile => ParamSchema::new(&["filePath"], &["filePath"]),
            WriteFile => ParamSchema::new(&["filePath", "content"], &["filePath", "bytesWritten"]),
            ReadFile => ParamSchema::new(&["filePath"], &["content"]),
            EditFile => ParamSchema::new(&["filePath", "edits"], &["filePath"]),
            DeleteFile => ParamSchema::new(&["filePath"], &["deleted"]),
            FormatCode => ParamSchema::new(&["filePath"], &["filePath"]),
            GitAdd => ParamSchema::new(&[], &["staged"]),
            GitCommit => ParamSchema::new(&["message"], &["commitHash"]),
            GitPush => ParamSchema::new(&[], &["pushed"]),
            BuildProject => ParamSchema::new(&[], &["artifacts"]),
            RunTests => ParamSchema::new(&[], &["passed", "failed"]),
            InstallDependencies => ParamSchema::new(&[], &["installed"]),
            CompressImage => ParamSchema::new(&["imagePath"], &["outputPath", "compressedSize"]),
            QueryDatabase => ParamSchema::new(&["query"], &["rows"]),
            ExportData => ParamSchema::new(&["rows"], &["exportPath"]),
            GenerateReport => ParamSchema::new(&["exportPath"], &["reportPath"]),
            SendEmail => ParamSchema::new(&["recipient"], &["messageId"]),
            Search => ParamSchema::new(&["query"], &["results"]),
            AnalyzeCode => ParamSchema::new(&["path"], &["issues"]),
            RefactorCode => ParamSchema::new(&["path"], &["changedFiles"]),
            SecurityScan => ParamSchema::new(&["path"], &["vulnerabilities"]),
            OptimizePerformance => ParamSchema::new(&["path"], &["optimizations"]),
            ReviewArchitecture => ParamSchema::new(&[], &["findings"]),
            MigrateSchema => ParamSchema::new(&["migration"], &["applied"]),
            CreateAndWriteFile => {
                ParamSchema::new(&["filePath", "content"], &["filePath", "bytesWritten"])
            }
            ReadAndEditFile => ParamSchema::new(&["filePath", "edits"], &["filePath"]),
            WriteAndFormatFile => ParamSchema::new(&["filePath", "content"], &["filePath"]),
            GitAddAndCommit => ParamSchema::new(&["message"], &["commitHash"]),
            GitCommitAndPush => ParamSchema::new(&["message"], &["commitHash", "pushed"]),
            GitAddCommitPush => ParamSchema::new(&["message"], &["commitHash", "pushed"]),
            BuildAndTest => ParamSchema::new(&[], &["passed", "failed"]),
            BatchCreateFiles | BatchDeleteFiles | BatchReadFiles => {
                ParamSchema::new(&["files"], &["results"])
            }
            BatchCompressImages => ParamSchema::new(&["images"], &["results"]),
            ChainedTask => ParamSchema::new(&["steps"], &["results"]),
            Unknown | Other(_) => ParamSchema::new(&[], &[]),
        }
    }

    /// Batch kind and dimension this kind collapses into, if batchable.
    pub fn batch(&self) -> Option<(IntentKind, BatchDimension)> {
        use IntentKind::*;
        match self {
            CreateFile => Some((
                BatchCreateFiles,
                BatchDimension { collection: "files", item_keys: &["filePath", "content"] },
            )),
            DeleteFile => Some((
                BatchDeleteFiles,
                BatchDimension { collection: "files", item_keys: &["filePath"] },
            )),
            ReadFile => Some((
                BatchReadFiles,
                BatchDimension { collection: "files", item_keys: &["filePath"] },
            )),
            CompressImage => Some((
                BatchCompressImages,
                BatchDimension { collection: "images", item_keys: &["imagePath", "outputPath"] },
            )),
            _ => None,
        }
    }

    /// Whether this kind is itself the product of fusion.
    pub fn is_compound(&self) -> bool {
        use IntentKind::*;
        matches!(
            self,
            CreateAndWriteFile
                | ReadAndEditFile
                | WriteAndFormatFile
                | GitAddAndCommit
                | GitCommitAndPush
                | GitAddCommitPush
                | BuildAndTest
                | BatchCreateFiles
                | BatchDeleteFiles
                | BatchReadFiles
                | BatchCompressImages
                | ChainedTask
        )
    }

    /// Kinds that need deep reasoning; drives the task-type complexity signal.
    pub fn is_heavy(&self) -> bool {
        use IntentKind::*;
        matches!(
            self,
            AnalyzeCode
                | RefactorCode
                | SecurityScan
                | OptimizePerformance
                | ReviewArchitecture
                | MigrateSchema
        )
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IntentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IntentKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip_for_catalog() {
        for (kind, name) in KNOWN {
            assert_eq!(kind.as_str(), *name);
            assert_eq!(&IntentKind::from_name(name), kind);
        }
    }

    #[test]
    fn test_from_name_is_lenient() {
        assert_eq!(IntentKind::from_name("create-file"), IntentKind::CreateFile);
        assert_eq!(IntentKind::from_name(" Git Push "), IntentKind::GitPush);
        assert_eq!(
            IntentKind::from_name("deploy_cluster"),
            IntentKind::Other("DEPLOY_CLUSTER".to_string())
        );
        assert_eq!(IntentKind::from_name(""), IntentKind::Unknown);
    }

    #[test]
    fn test_serde_as_plain_string() {
        let json = serde_json::to_string(&IntentKind::BatchCreateFiles).unwrap();
        assert_eq!(json, "\"BATCH_CREATE_FILES\"");
        let back: IntentKind = serde_json::from_str("\"security_scan\"").unwrap();
        assert_eq!(back, IntentKind::SecurityScan);
    }

    #[test]
    fn test_batch_kinds_are_compound() {
        for (kind, _) in KNOWN {
            if let Some((batch, _)) = kind.batch() {
                assert!(batch.is_compound());
                assert!(batch.batch().is_none());
            }
        }
    }
}
