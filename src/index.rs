//! The published package index: reading the previous one, assembling the
//! next one, and the latest-version view over it.

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::error::ConfigError;
use crate::listing::ListingSource;
use crate::manifest::{PackageDescriptor, null_as_default};

/// File name of the published index inside the output directory.
pub const INDEX_FILENAME: &str = "index.json";

/// All published versions of one package.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PackageVersions {
    #[serde(default, deserialize_with = "null_as_default")]
    pub versions: BTreeMap<String, PackageDescriptor>,
}

/// VPM repository listing document.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IndexDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_author_name")]
    pub author: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub packages: BTreeMap<String, PackageVersions>,
}

impl IndexDocument {
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        serde_json::from_str(text).map_err(|source| ConfigError::Unparsable {
            origin: origin.to_string(),
            source,
        })
    }

    /// Pretty-printed JSON with a trailing newline. The output only depends
    /// on the document's contents.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Every descriptor in the document, ordered by id then version key.
    pub fn descriptors(&self) -> impl Iterator<Item = &PackageDescriptor> {
        self.packages.values().flat_map(|p| p.versions.values())
    }

    pub fn len(&self) -> usize {
        self.packages.values().map(|p| p.versions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_if_absent(&mut self, descriptor: PackageDescriptor) -> bool {
        let versions = &mut self
            .packages
            .entry(descriptor.id().to_string())
            .or_default()
            .versions;

        if versions.contains_key(descriptor.version()) {
            return false;
        }
        versions.insert(descriptor.version().to_string(), descriptor);
        true
    }
}

/// Older indexes wrote the author as an object.
fn deserialize_author_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AuthorField {
        Name(String),
        Full {
            #[serde(default)]
            name: Option<String>,
        },
    }

    Ok(match Option::<AuthorField>::deserialize(deserializer)? {
        Some(AuthorField::Name(name)) => name,
        Some(AuthorField::Full { name }) => name.unwrap_or_default(),
        None => String::new(),
    })
}

/// The previous run's output, reduced to what reconciliation looks up.
#[derive(Debug, Default)]
pub struct ExistingIndex {
    descriptors: Vec<PackageDescriptor>,
    urls: HashSet<String>,
    identities: HashSet<(String, String)>,
}

impl ExistingIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_document(document: IndexDocument) -> Self {
        let descriptors: Vec<PackageDescriptor> = document
            .packages
            .into_values()
            .flat_map(|p| p.versions.into_values())
            .collect();

        let urls = descriptors
            .iter()
            .map(|d| d.archive_url().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        let identities = descriptors.iter().map(PackageDescriptor::identity).collect();

        Self {
            descriptors,
            urls,
            identities,
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn contains_identity(&self, id: &str, version: &str) -> bool {
        self.identities
            .contains(&(id.to_string(), version.to_string()))
    }

    pub fn descriptors(&self) -> &[PackageDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Build the next index: every existing entry plus the accepted ones.
/// An accepted descriptor never replaces an existing identity.
pub fn assemble(
    listing: &ListingSource,
    accepted: &[PackageDescriptor],
    existing: &ExistingIndex,
) -> IndexDocument {
    let mut document = IndexDocument {
        name: listing.name.clone(),
        id: listing.id.clone(),
        author: listing.author_name().to_string(),
        url: listing.url.clone(),
        packages: BTreeMap::new(),
    };

    for descriptor in existing.descriptors().iter().chain(accepted) {
        document.insert_if_absent(descriptor.clone());
    }

    document
}

/// Highest version of each package, sorted by id.
pub fn latest_view<'a, I>(descriptors: I) -> Vec<&'a PackageDescriptor>
where
    I: IntoIterator<Item = &'a PackageDescriptor>,
{
    let mut latest: BTreeMap<&str, &PackageDescriptor> = BTreeMap::new();

    for descriptor in descriptors {
        latest
            .entry(descriptor.id())
            .and_modify(|current| {
                if compare_versions(descriptor.version(), current.version()) == Ordering::Greater {
                    *current = descriptor;
                }
            })
            .or_insert(descriptor);
    }

    latest.into_values().collect()
}

/// Semver ordering; strings that are not valid semver sort below every valid
/// version and compare lexically among themselves.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a.trim()), Version::parse(b.trim())) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
