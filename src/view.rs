//! Display projections handed to the website templates.

use serde::Serialize;
use std::fmt;

use crate::listing::ListingSource;
use crate::manifest::PackageDescriptor;

/// Dependency marking a package as an avatar package.
pub const AVATARS_PACKAGE: &str = "com.vrchat.avatars";

/// Dependency marking a package as a world package.
pub const WORLDS_PACKAGE: &str = "com.vrchat.worlds";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Any,
    Avatar,
    World,
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageType::Any => write!(f, "Any"),
            PackageType::Avatar => write!(f, "Avatar"),
            PackageType::World => write!(f, "World"),
        }
    }
}

/// Categorize by dependencies. Avatar wins when both are present.
pub fn package_type(descriptor: &PackageDescriptor) -> PackageType {
    let dependencies = &descriptor.manifest().dependencies;
    if dependencies.contains_key(AVATARS_PACKAGE) {
        PackageType::Avatar
    } else if dependencies.contains_key(WORLDS_PACKAGE) {
        PackageType::World
    } else {
        PackageType::Any
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct LinkView {
    pub text: Option<String>,
    pub url: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct AuthorView {
    pub name: Option<String>,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Listing metadata as the templates see it.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListingInfo {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub info_link: LinkView,
    pub author: AuthorView,
    pub banner_image: bool,
    pub banner_image_url: Option<String>,
}

impl ListingInfo {
    pub fn from_listing(listing: &ListingSource) -> Self {
        let banner_image_url = listing
            .banner_url
            .clone()
            .filter(|url| !url.trim().is_empty());

        ListingInfo {
            name: listing.name.clone(),
            url: listing.url.clone(),
            description: listing.description.clone(),
            info_link: listing
                .info_link
                .as_ref()
                .map(|link| LinkView {
                    text: Some(link.text.clone()),
                    url: Some(link.url.clone()),
                })
                .unwrap_or_default(),
            author: AuthorView {
                name: listing.author.name.clone(),
                url: listing.author.url.clone(),
                email: listing.author.email.clone(),
            },
            banner_image: banner_image_url.is_some(),
            banner_image_url,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DependencyView {
    pub name: String,
    pub version: String,
}

/// One package row on the listing website.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormattedPackage {
    pub name: String,
    pub author: AuthorView,
    pub archive_url: String,
    pub license: Option<String>,
    pub license_url: Option<String>,
    pub keywords: Vec<String>,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub version: String,
    pub dependencies: Vec<DependencyView>,
}

impl From<&PackageDescriptor> for FormattedPackage {
    fn from(descriptor: &PackageDescriptor) -> Self {
        let manifest = descriptor.manifest();
        let author = manifest.author.clone().unwrap_or_default();

        FormattedPackage {
            name: manifest.id.clone(),
            author: AuthorView {
                name: author.name,
                url: author.url,
                email: None,
            },
            archive_url: descriptor.archive_url().to_string(),
            license: manifest.license.clone(),
            license_url: manifest.license_url.clone(),
            keywords: manifest.keywords.clone(),
            package_type: package_type(descriptor),
            description: manifest.description.clone(),
            display_name: manifest.display_name.clone(),
            version: manifest.version.clone(),
            dependencies: manifest
                .dependencies
                .iter()
                .map(|(name, version)| DependencyView {
                    name: name.clone(),
                    version: version.clone(),
                })
                .collect(),
        }
    }
}

/// Project the latest view into website rows, keeping its order.
pub fn format_packages<'a, I>(latest: I) -> Vec<FormattedPackage>
where
    I: IntoIterator<Item = &'a PackageDescriptor>,
{
    latest.into_iter().map(FormattedPackage::from).collect()
}
