//! Format catalog for docroute
//!
//! Static registry of supported document formats and the conversion edges
//! between them. The catalog is the single source of truth for both: the
//! resolver, the HTTP API and the CLI all read formats and edges from here,
//! and the compatibility matrix is derived from the edge table rather than
//! declared alongside it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use thiserror::Error;

/// Errors raised while building or querying a catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Format declared twice: {0}")]
    DuplicateFormat(String),

    #[error("Direct edge {from} -> {to} declared twice")]
    DuplicateEdge { from: String, to: String },

    #[error("Intermediate edge {from} -> {to} has no intermediate format")]
    MissingIntermediate { from: String, to: String },

    #[error("Direct edge {from} -> {to} must not name an intermediate format")]
    UnexpectedIntermediate { from: String, to: String },

    #[error("Intermediate edge {from} -> {to} via {via}: no direct edge {via} -> {to}")]
    DanglingIntermediate { from: String, to: String, via: String },
}

/// Coarse estimate of fidelity lost by a conversion hop.
///
/// Ordered: `None < Minimal < Moderate < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLoss {
    None,
    Minimal,
    Moderate,
    High,
}

impl std::fmt::Display for QualityLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityLoss::None => write!(f, "none"),
            QualityLoss::Minimal => write!(f, "minimal"),
            QualityLoss::Moderate => write!(f, "moderate"),
            QualityLoss::High => write!(f, "high"),
        }
    }
}

/// Whether an edge is a complete route on its own or the first leg of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMethod {
    Direct,
    Intermediate,
}

/// Relative effort a format takes to read or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Capability flags of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCapabilities {
    pub supports_metadata: bool,
    pub supports_images: bool,
    pub supports_drm: bool,
    pub is_proprietary: bool,
}

/// A supported file representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    /// Lowercase identifier, e.g. "epub"
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub mime_type: String,
    pub capabilities: FormatCapabilities,
    pub complexity: Complexity,
}

/// A statically declared conversion.
///
/// A direct edge is one collaborator hop `from -> to`. An intermediate edge
/// says `from` can reach `to` through `intermediate`; its duration and loss
/// describe the first hop `from -> intermediate`, and the second hop is the
/// direct edge `intermediate -> to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEdge {
    pub from: String,
    pub to: String,
    pub method: ConversionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<String>,
    pub estimated_duration_secs: u32,
    pub quality_loss: QualityLoss,
}

impl ConversionEdge {
    /// Declare a direct edge
    pub fn direct(from: &str, to: &str, secs: u32, loss: QualityLoss) -> Self {
        Self {
            from: normalize_id(from),
            to: normalize_id(to),
            method: ConversionMethod::Direct,
            intermediate: None,
            estimated_duration_secs: secs,
            quality_loss: loss,
        }
    }

    /// Declare an intermediate edge routed through `via`
    pub fn via(from: &str, to: &str, via: &str, secs: u32, loss: QualityLoss) -> Self {
        Self {
            from: normalize_id(from),
            to: normalize_id(to),
            method: ConversionMethod::Intermediate,
            intermediate: Some(normalize_id(via)),
            estimated_duration_secs: secs,
            quality_loss: loss,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.method == ConversionMethod::Direct
    }
}

/// Canonical form of a format identifier
pub fn normalize_id(id: &str) -> String {
    id.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Immutable registry of formats and edges
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    formats: Vec<Format>,
    edges: Vec<ConversionEdge>,
}

impl FormatCatalog {
    /// Build a catalog, validating the edge table against the formats.
    pub fn new(formats: Vec<Format>, edges: Vec<ConversionEdge>) -> Result<Self, CatalogError> {
        let mut ids = HashSet::new();
        for format in &formats {
            if !ids.insert(format.id.as_str()) {
                return Err(CatalogError::DuplicateFormat(format.id.clone()));
            }
        }

        let mut direct_pairs = HashSet::new();
        for edge in &edges {
            for id in [&edge.from, &edge.to].into_iter().chain(edge.intermediate.iter()) {
                if !ids.contains(id.as_str()) {
                    return Err(CatalogError::UnknownFormat(id.clone()));
                }
            }
            match (edge.method, &edge.intermediate) {
                (ConversionMethod::Direct, Some(_)) => {
                    return Err(CatalogError::UnexpectedIntermediate {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                    });
                }
                (ConversionMethod::Intermediate, None) => {
                    return Err(CatalogError::MissingIntermediate {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                    });
                }
                (ConversionMethod::Direct, None) => {
                    if !direct_pairs.insert((edge.from.as_str(), edge.to.as_str())) {
                        return Err(CatalogError::DuplicateEdge {
                            from: edge.from.clone(),
                            to: edge.to.clone(),
                        });
                    }
                }
                (ConversionMethod::Intermediate, Some(_)) => {}
            }
        }

        for edge in edges.iter().filter(|e| !e.is_direct()) {
            if let Some(via) = &edge.intermediate {
                if !direct_pairs.contains(&(via.as_str(), edge.to.as_str())) {
                    return Err(CatalogError::DanglingIntermediate {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        via: via.clone(),
                    });
                }
            }
        }

        Ok(Self { formats, edges })
    }

    /// The built-in format and edge table
    pub fn builtin() -> Self {
        Self::new(builtin_formats(), builtin_edges()).expect("built-in catalog is valid")
    }

    pub fn lookup(&self, id: &str) -> Result<&Format, CatalogError> {
        let id = normalize_id(id);
        self.formats
            .iter()
            .find(|f| f.id == id)
            .ok_or(CatalogError::UnknownFormat(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_ok()
    }

    /// All formats in declaration order
    pub fn list_all(&self) -> &[Format] {
        &self.formats
    }

    /// All edges in declaration order
    pub fn edges(&self) -> &[ConversionEdge] {
        &self.edges
    }

    /// The direct edge `from -> to`, if declared
    pub fn direct_edge(&self, from: &str, to: &str) -> Option<&ConversionEdge> {
        self.edges
            .iter()
            .find(|e| e.is_direct() && e.from == from && e.to == to)
    }

    /// Intermediate edges leaving `from`, in declaration order
    pub fn intermediate_edges_from<'a>(
        &'a self,
        from: &'a str,
    ) -> impl Iterator<Item = &'a ConversionEdge> + 'a {
        self.edges
            .iter()
            .filter(move |e| !e.is_direct() && e.from == from)
    }

    /// Targets reachable from each source by one direct edge or one
    /// intermediate hop. Identity conversions are not listed.
    pub fn compatibility_matrix(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut matrix: BTreeMap<String, BTreeSet<String>> = self
            .formats
            .iter()
            .map(|f| (f.id.clone(), BTreeSet::new()))
            .collect();

        for edge in &self.edges {
            let targets = matrix.entry(edge.from.clone()).or_default();
            match &edge.intermediate {
                None => {
                    targets.insert(edge.to.clone());
                }
                Some(via) => {
                    for second in self.edges.iter().filter(|e| e.is_direct() && &e.from == via) {
                        targets.insert(second.to.clone());
                    }
                }
            }
        }

        for (source, targets) in matrix.iter_mut() {
            targets.remove(source);
        }
        matrix
    }
}

impl Default for FormatCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn format(
    id: &str,
    name: &str,
    mime_type: &str,
    flags: [bool; 4],
    complexity: Complexity,
) -> Format {
    let [supports_metadata, supports_images, supports_drm, is_proprietary] = flags;
    Format {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        capabilities: FormatCapabilities {
            supports_metadata,
            supports_images,
            supports_drm,
            is_proprietary,
        },
        complexity,
    }
}

// flags: [metadata, images, drm, proprietary]
fn builtin_formats() -> Vec<Format> {
    use Complexity::*;
    vec![
        format("pdf", "Portable Document Format", "application/pdf", [true, true, true, false], High),
        format("epub", "EPUB", "application/epub+zip", [true, true, true, false], Medium),
        format("mobi", "Mobipocket", "application/x-mobipocket-ebook", [true, true, true, true], Medium),
        format("azw3", "Kindle Format 8", "application/vnd.amazon.ebook", [true, true, true, true], Medium),
        format("fb2", "FictionBook", "application/x-fictionbook+xml", [true, true, false, false], Low),
        format("docx", "Word Document", "application/vnd.openxmlformats-officedocument.wordprocessingml.document", [true, true, false, true], Medium),
        format("doc", "Word 97-2003 Document", "application/msword", [true, true, false, true], High),
        format("odt", "OpenDocument Text", "application/vnd.oasis.opendocument.text", [true, true, false, false], Medium),
        format("rtf", "Rich Text Format", "application/rtf", [true, true, false, true], Low),
        format("txt", "Plain Text", "text/plain", [false, false, false, false], Low),
        format("html", "HTML", "text/html", [true, true, false, false], Low),
        format("md", "Markdown", "text/markdown", [false, true, false, false], Low),
        format("latex", "LaTeX", "application/x-latex", [true, true, false, false], High),
        format("jpg", "JPEG Image", "image/jpeg", [true, true, false, false], Low),
        format("png", "PNG Image", "image/png", [true, true, false, false], Low),
    ]
}

fn builtin_edges() -> Vec<ConversionEdge> {
    use QualityLoss::*;
    let d = ConversionEdge::direct;
    let v = ConversionEdge::via;
    vec![
        // e-books
        d("epub", "pdf", 25, Minimal),
        d("epub", "mobi", 20, Minimal),
        d("epub", "azw3", 20, Minimal),
        d("epub", "html", 10, Minimal),
        d("epub", "txt", 8, High),
        d("mobi", "epub", 20, Minimal),
        d("azw3", "epub", 20, Minimal),
        d("fb2", "epub", 15, Minimal),
        v("mobi", "pdf", "epub", 20, Minimal),
        v("azw3", "pdf", "epub", 20, Minimal),
        v("fb2", "pdf", "epub", 15, Minimal),
        v("epub", "docx", "html", 10, Minimal),
        // pdf
        d("pdf", "txt", 15, High),
        d("pdf", "html", 30, Moderate),
        d("pdf", "png", 10, Moderate),
        d("pdf", "jpg", 10, Moderate),
        v("pdf", "epub", "html", 30, Moderate),
        // office documents
        d("docx", "pdf", 20, Minimal),
        d("docx", "html", 12, Minimal),
        d("docx", "odt", 15, Minimal),
        d("docx", "txt", 5, High),
        d("docx", "md", 10, Moderate),
        d("doc", "html", 45, Moderate),
        d("doc", "pdf", 30, Moderate),
        d("odt", "docx", 15, Minimal),
        d("odt", "pdf", 20, Minimal),
        d("rtf", "docx", 10, Minimal),
        d("rtf", "txt", 5, Moderate),
        v("docx", "epub", "html", 12, Minimal),
        v("doc", "epub", "html", 45, Moderate),
        v("rtf", "pdf", "docx", 10, Minimal),
        v("odt", "html", "docx", 15, Minimal),
        // markup
        d("html", "epub", 15, Minimal),
        d("html", "pdf", 20, Minimal),
        d("html", "md", 8, Moderate),
        d("html", "txt", 5, High),
        d("html", "docx", 15, Moderate),
        d("md", "html", 5, None),
        d("latex", "pdf", 30, None),
        d("txt", "html", 3, None),
        v("md", "pdf", "html", 5, None),
        v("md", "epub", "html", 5, None),
        v("txt", "epub", "html", 3, None),
        v("txt", "pdf", "html", 3, None),
        // images
        d("jpg", "pdf", 5, None),
        d("png", "pdf", 5, None),
        d("jpg", "png", 3, None),
        d("png", "jpg", 3, Minimal),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_formats(ids: &[&str]) -> Vec<Format> {
        ids.iter()
            .map(|id| format(id, id, "application/octet-stream", [false; 4], Complexity::Low))
            .collect()
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = FormatCatalog::new(builtin_formats(), builtin_edges());
        assert!(catalog.is_ok(), "{:?}", catalog.err());
    }

    #[test]
    fn test_lookup_normalizes_id() {
        let catalog = FormatCatalog::builtin();
        assert_eq!(catalog.lookup("EPUB").unwrap().id, "epub");
        assert_eq!(catalog.lookup(" .pdf ").unwrap().mime_type, "application/pdf");
        assert_eq!(
            catalog.lookup("mp3"),
            Err(CatalogError::UnknownFormat("mp3".to_string()))
        );
    }

    #[test]
    fn test_list_all_keeps_declaration_order() {
        let catalog = FormatCatalog::builtin();
        let ids: Vec<&str> = catalog.list_all().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids.first(), Some(&"pdf"));
        assert_eq!(ids.last(), Some(&"png"));
        assert!(!ids.contains(&"mp3"));
    }

    #[test]
    fn test_quality_loss_ordering() {
        assert!(QualityLoss::None < QualityLoss::Minimal);
        assert!(QualityLoss::Minimal < QualityLoss::Moderate);
        assert!(QualityLoss::Moderate < QualityLoss::High);
        assert_eq!(QualityLoss::Minimal.max(QualityLoss::Moderate), QualityLoss::Moderate);
    }

    #[test]
    fn test_rejects_dangling_intermediate() {
        let err = FormatCatalog::new(
            tiny_formats(&["a", "b", "c"]),
            vec![ConversionEdge::via("a", "c", "b", 10, QualityLoss::None)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            CatalogError::DanglingIntermediate {
                from: "a".into(),
                to: "c".into(),
                via: "b".into()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_format_in_edge() {
        let err = FormatCatalog::new(
            tiny_formats(&["a"]),
            vec![ConversionEdge::direct("a", "z", 1, QualityLoss::None)],
        )
        .unwrap_err();
        assert_eq!(err, CatalogError::UnknownFormat("z".into()));
    }

    #[test]
    fn test_rejects_duplicates_and_malformed_edges() {
        assert_eq!(
            FormatCatalog::new(tiny_formats(&["a", "a"]), vec![]).unwrap_err(),
            CatalogError::DuplicateFormat("a".into())
        );

        let dup = FormatCatalog::new(
            tiny_formats(&["a", "b"]),
            vec![
                ConversionEdge::direct("a", "b", 1, QualityLoss::None),
                ConversionEdge::direct("a", "b", 2, QualityLoss::High),
            ],
        );
        assert!(matches!(dup, Err(CatalogError::DuplicateEdge { .. })));

        let mut missing = ConversionEdge::via("a", "b", "b", 1, QualityLoss::None);
        missing.intermediate = None;
        let res = FormatCatalog::new(tiny_formats(&["a", "b"]), vec![missing]);
        assert!(matches!(res, Err(CatalogError::MissingIntermediate { .. })));

        let mut unexpected = ConversionEdge::direct("a", "b", 1, QualityLoss::None);
        unexpected.intermediate = Some("a".into());
        let res = FormatCatalog::new(tiny_formats(&["a", "b"]), vec![unexpected]);
        assert!(matches!(res, Err(CatalogError::UnexpectedIntermediate { .. })));
    }

    #[test]
    fn test_compatibility_matrix_is_derived_from_edges() {
        let catalog = FormatCatalog::builtin();
        let matrix = catalog.compatibility_matrix();

        let doc = &matrix["doc"];
        assert!(doc.contains("html"));
        assert!(doc.contains("pdf"));
        // reachable only through html
        assert!(doc.contains("epub"));
        assert!(doc.contains("md"));
        assert!(!doc.contains("doc"));

        for (source, targets) in &matrix {
            assert!(catalog.contains(source));
            assert!(!targets.contains(source));
        }
    }

    #[test]
    fn test_edge_serializes_without_empty_intermediate() {
        let edge = ConversionEdge::direct("epub", "pdf", 25, QualityLoss::Minimal);
        let json = serde_json::to_string(&edge).unwrap();
        assert!(!json.contains("intermediate"));
        assert!(json.contains("\"method\":\"direct\""));
        assert!(json.contains("\"quality_loss\":\"minimal\""));
    }
}
