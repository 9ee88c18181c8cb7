//! Operations the background host executes, with their payloads and results.
//!
//! Requests form a closed enum so every payload is strongly typed at the
//! call site. Results are decoded from the host's `success` payload by the
//! typed methods on `Bridge`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::TransferBuffer;

/// One operation sent to the background host.
///
/// Serialized adjacently tagged: `{"kind": "analyzeFiles", "payload": {...}}`.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum OperationRequest {
    /// One-time startup of the embedded interpreter. The host answers with
    /// `ready` (and may also send `success` for this request).
    Initialize,
    /// Parse DICOM files and extract per-acquisition fields.
    AnalyzeFiles(AnalyzeFilesParams),
    /// Map input acquisitions onto the acquisitions of a reference.
    MapAcquisitions(MapAcquisitionsParams),
    /// Compare analysed acquisitions against a reference.
    ValidateCompliance(ValidateComplianceParams),
    /// Build a reference template from analysed acquisitions.
    GenerateTemplate(GenerateTemplateParams),
    /// Drop anything the host cached between calls.
    ClearCache,
}

impl OperationRequest {
    /// Wire name of the operation, as it appears in the `kind` field.
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::Initialize => "initialize",
            OperationRequest::AnalyzeFiles(_) => "analyzeFiles",
            OperationRequest::MapAcquisitions(_) => "mapAcquisitions",
            OperationRequest::ValidateCompliance(_) => "validateCompliance",
            OperationRequest::GenerateTemplate(_) => "generateTemplate",
            OperationRequest::ClearCache => "clearCache",
        }
    }

    /// Whether this is the startup operation, which only the init gate sends.
    pub fn is_startup(&self) -> bool {
        matches!(self, OperationRequest::Initialize)
    }

    /// Transferable buffers carried by this request, in wire order.
    pub fn buffers_mut(&mut self) -> Vec<&mut TransferBuffer> {
        match self {
            OperationRequest::AnalyzeFiles(params) => {
                params.files.iter_mut().map(|f| &mut f.data).collect()
            }
            OperationRequest::MapAcquisitions(params) => {
                params.files.iter_mut().map(|f| &mut f.data).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// A named file whose bytes are transferred to the host.
///
/// `data` never goes through serde: the in-process transport moves it with
/// the envelope and the stdio transport sends it as a raw attachment.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(skip)]
    pub data: TransferBuffer,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, data: impl Into<TransferBuffer>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeFilesParams {
    pub files: Vec<FileEntry>,
}

/// Where a reference session comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReferenceSource {
    /// A JSON reference document.
    Json { content: Value },
    /// A Python module defining validation models, given as source text.
    Python { module: String },
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct MapAcquisitionsParams {
    pub reference: ReferenceSource,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidateComplianceParams {
    pub reference: ReferenceSource,
    /// Analysed input session, as returned by `analyzeFiles`.
    pub acquisitions: Value,
    /// Input acquisition key to reference acquisition key.
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTemplateParams {
    pub acquisitions: Value,
    pub selected_fields: Vec<String>,
}

/// Result of `analyzeFiles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub acquisitions: BTreeMap<String, Value>,
    #[serde(default)]
    pub file_count: usize,
}

/// Result of `mapAcquisitions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMapping {
    pub reference_acquisitions: Value,
    pub input_acquisitions: Vec<String>,
    pub session_map: BTreeMap<String, String>,
}

/// One row of a compliance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    #[serde(rename = "reference acquisition", default)]
    pub reference_acquisition: Option<String>,
    #[serde(rename = "input acquisition", default)]
    pub input_acquisition: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub expected: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub message: Option<String>,
    pub passed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of `validateCompliance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplianceReport(pub Vec<ComplianceResult>);

impl ComplianceReport {
    pub fn all_passed(&self) -> bool {
        self.0.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComplianceResult> {
        self.0.iter().filter(|r| !r.passed)
    }
}

/// Result of `generateTemplate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub acquisitions: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
