//! Package manifests (`package.json`) and the descriptors built from them.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::{IdentityField, ManifestError};
use crate::hash::ContentHash;

/// Name of the manifest entry at the root of every package archive.
pub const MANIFEST_ENTRY: &str = "package.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Package metadata as declared by the archive, before it is tied to the
/// location it was downloaded from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(rename = "name", default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unity: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_author",
        skip_serializing_if = "Option::is_none"
    )]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(rename = "licensesUrl", default, skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub keywords: Vec<String>,
    #[serde(
        rename = "vpmDependencies",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub dependencies: BTreeMap<String, String>,
    /// Fields this tool does not interpret (`samples`, `legacyFolders`,
    /// ...), republished untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PackageManifest {
    /// Attach the archive location and fingerprint. This is the only way a
    /// descriptor gets its `archive_url`.
    pub fn into_descriptor(self, archive_url: String, content_hash: ContentHash) -> PackageDescriptor {
        PackageDescriptor {
            manifest: self,
            archive_url,
            content_hash: Some(content_hash),
        }
    }
}

/// A verified package release as it appears in the published index.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageDescriptor {
    #[serde(flatten)]
    manifest: PackageManifest,
    #[serde(rename = "url", default)]
    archive_url: String,
    #[serde(rename = "zipSHA256", default, skip_serializing_if = "Option::is_none")]
    content_hash: Option<ContentHash>,
}

impl PackageDescriptor {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn identity(&self) -> (String, String) {
        (self.manifest.id.clone(), self.manifest.version.clone())
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    pub fn archive_url(&self) -> &str {
        &self.archive_url
    }

    pub fn content_hash(&self) -> Option<&ContentHash> {
        self.content_hash.as_ref()
    }
}

/// Parse raw manifest bytes and check them against any declared identity.
///
/// Pure: no I/O, the same inputs always give the same result.
pub fn validate(
    raw: &[u8],
    declared_id: Option<&str>,
    declared_version: Option<&str>,
) -> Result<PackageManifest, ManifestError> {
    let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);

    let manifest: PackageManifest = serde_json::from_slice(raw)
        .map_err(|e| ManifestError::MalformedManifest(e.to_string()))?;

    if manifest.id.trim().is_empty() {
        return Err(ManifestError::MalformedManifest(
            "missing required field 'name'".to_string(),
        ));
    }
    if manifest.version.trim().is_empty() {
        return Err(ManifestError::MalformedManifest(
            "missing required field 'version'".to_string(),
        ));
    }

    if let Some(declared) = declared_id
        && declared != manifest.id
    {
        return Err(ManifestError::IdentityMismatch {
            field: IdentityField::Id,
            declared: declared.to_string(),
            found: manifest.id,
        });
    }

    if let Some(declared) = declared_version
        && declared != manifest.version
    {
        return Err(ManifestError::IdentityMismatch {
            field: IdentityField::Version,
            declared: declared.to_string(),
            found: manifest.version,
        });
    }

    Ok(manifest)
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// UPM allows `"author": "Name"` as well as the object form.
fn deserialize_author<'de, D>(deserializer: D) -> Result<Option<Author>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AuthorField {
        Name(String),
        Full(Author),
    }

    Ok(match Option::<AuthorField>::deserialize(deserializer)? {
        Some(AuthorField::Name(name)) => Some(Author {
            name: Some(name),
            ..Default::default()
        }),
        Some(AuthorField::Full(author)) => Some(author),
        None => None,
    })
}
