//! Pipeline-wide feature flags consumed by the stage processors (spec §6
//! configuration table). Passed into stage constructors at startup rather
//! than read from globals (spec §9 "global configuration" redesign note).

/// Extensions the ingest stage accepts. Scattered across call sites in the
/// original source (spec §9 open question); consolidated here as a single
/// list.
const DEFAULT_SUPPORTED_EXTENSIONS: &[&str] = &["epub", "kepub", "pdf", "cbz"];

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub organize_enabled: bool,
    pub convert_enabled: bool,
    pub embed_metadata_enabled: bool,
    pub supported_extensions: Vec<String>,
}

impl PipelineConfig {
    pub fn is_supported_extension(&self, ext: &str) -> bool {
        self.supported_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }

    /// Whether `format` needs to be converted to kepub. Only plain epub
    /// needs it; kepub, pdf and cbz pass through untouched.
    pub fn needs_conversion(&self, format: &str) -> bool {
        self.convert_enabled && format.eq_ignore_ascii_case("epub")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            organize_enabled: true,
            convert_enabled: true,
            embed_metadata_enabled: true,
            supported_extensions: DEFAULT_SUPPORTED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
