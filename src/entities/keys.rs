//! Attribute key constants for Attrs access.
//!
//! Avoid string typos, enable IDE autocomplete.
//! Usage: `entity.attrs.label(A_ROLE)`

// === Identity ===
/// Entity uid (also the map key inside a collection)
pub const A_UID: &str = "uid";
/// Human-readable name
pub const A_NAME: &str = "name";

// === Hierarchy ===
/// Geological role (fault, horizon, intrusive, ...)
pub const A_ROLE: &str = "role";
/// Geometric topology (PolyLine, TriSurf, VertexSet, ...)
pub const A_TOPOLOGY: &str = "topology";
/// Geological feature the entity belongs to
pub const A_FEATURE: &str = "feature";
/// Interpretation scenario
pub const A_SCENARIO: &str = "scenario";
/// Well location id
pub const A_LOC_ID: &str = "loc_id";

// === Placement ===
/// Parent cross-section uid for entities drawn on a section
pub const A_X_SECTION: &str = "x_section";

