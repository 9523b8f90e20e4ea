//! Cloud Resource Name (CRN) parsing and normalization
//!
//! A CRN is a colon-separated 10-field tuple identifying a cloud resource:
//!
//! ```text
//! crn:version:cname:ctype:service:location:scope:instance:resource-type:resource
//! ```
//!
//! The canonical comparison key is `(service, location)`; the full tuple is
//! preserved. Parsing lowercases the whole identifier and rewrites the legacy
//! `ibmcloud:` scheme to the canonical `crn:` scheme, so normalization is
//! idempotent: parsing the `Display` form of a parsed CRN yields the same CRN.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical scheme prefix
pub const CRN_SCHEME: &str = "crn";

/// Legacy scheme prefix, rewritten to [`CRN_SCHEME`] on ingress
pub const LEGACY_SCHEME: &str = "ibmcloud";

/// ctype marking a resource as belonging to the public cloud
pub const PUBLIC_CTYPE: &str = "public";

/// Reserved service name for the pipeline's own heartbeat records.
/// Exempt from the external-catalog enablement check.
pub const HEARTBEAT_SERVICE: &str = "pnp-heartbeat";

/// A parsed, case-normalized CRN
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crn {
    pub version: String,
    pub cname: String,
    pub ctype: String,
    pub service: String,
    pub location: String,
    pub scope: String,
    pub instance: String,
    pub resource_type: String,
    pub resource: String,
}

impl Crn {
    /// Parse a raw CRN string.
    ///
    /// Lowercases the input, accepts the legacy scheme, and requires exactly
    /// 10 colon-separated fields. Unparseable identifiers are dropped by the
    /// normalizer, not treated as malformed messages.
    pub fn parse(raw: &str) -> Result<Crn> {
        let lowered = raw.trim().to_ascii_lowercase();
        let parts: Vec<&str> = lowered.split(':').collect();
        if parts.len() != 10 {
            return Err(Error::Malformed(format!(
                "CRN must have 10 colon-separated fields, got {}: {}",
                parts.len(),
                raw
            )));
        }
        if parts[0] != CRN_SCHEME && parts[0] != LEGACY_SCHEME {
            return Err(Error::Malformed(format!(
                "CRN scheme must be '{}' or '{}': {}",
                CRN_SCHEME, LEGACY_SCHEME, raw
            )));
        }
        Ok(Crn {
            version: parts[1].to_string(),
            cname: parts[2].to_string(),
            ctype: parts[3].to_string(),
            service: parts[4].to_string(),
            location: parts[5].to_string(),
            scope: parts[6].to_string(),
            instance: parts[7].to_string(),
            resource_type: parts[8].to_string(),
            resource: parts[9].to_string(),
        })
    }

    /// Canonical comparison key: `(service, location)`
    pub fn comparison_key(&self) -> (&str, &str) {
        (&self.service, &self.location)
    }

    /// Copy of this CRN with the service field replaced.
    ///
    /// Used when the external catalog declares a status-page parent for a
    /// sub-component, coalescing it into the published surface.
    pub fn with_service(&self, service: &str) -> Crn {
        let mut crn = self.clone();
        crn.service = service.to_ascii_lowercase();
        crn
    }

    /// Whether the resource belongs to the public cloud, or to an
    /// explicitly-allowed out-of-public-cloud program (by cname).
    pub fn is_public_cloud(&self, allowed_cnames: &[String]) -> bool {
        self.ctype == PUBLIC_CTYPE || allowed_cnames.iter().any(|c| c == &self.cname)
    }
}

impl fmt::Display for Crn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            CRN_SCHEME,
            self.version,
            self.cname,
            self.ctype,
            self.service,
            self.location,
            self.scope,
            self.instance,
            self.resource_type,
            self.resource
        )
    }
}
