//! Static catalog of the supported hardware platforms.
//!
//! Platforms are immutable and loaded once. Besides the real platforms of the catalog, a mixed
//! fixture may require a synthesized platform that represents several physical platforms driven
//! as one logical target (see [`Platform::mixed`]).

use std::{
    collections::{BTreeSet, HashMap},
    fmt::Display,
    sync::LazyLock,
};

use crate::{Error, Result};

/// A hardware/firmware variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    id: u32,
    name: String,
    display_name: String,
    tags: Vec<String>,
    members: Vec<u32>,
}

impl Platform {
    fn new(id: u32, name: &str, display_name: &str, tags: &[&str]) -> Self {
        Self {
            id,
            name: name.to_string(),
            display_name: display_name.to_string(),
            tags: tags.iter().map(|x| x.to_string()).collect(),
            members: Vec::new(),
        }
    }

    /// Synthesize a pseudo-platform standing for all `platforms` at once.
    ///
    /// The numeric id combines the constituent ids as base-100 digits, so it can never collide
    /// with a catalog id.
    pub fn mixed(platforms: &[Platform]) -> Self {
        let id = platforms
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, p)| {
                acc.saturating_add(p.id.saturating_mul(100u32.saturating_pow(i as u32)))
            });
        let mut tags: Vec<String> = Vec::new();
        for t in platforms.iter().flat_map(|p| p.tags.iter()) {
            if !tags.contains(t) {
                tags.push(t.clone());
            }
        }

        Self {
            id,
            name: platforms
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join("/"),
            display_name: platforms
                .iter()
                .map(|p| p.display_name.as_str())
                .collect::<Vec<_>>()
                .join(" / "),
            tags,
            members: platforms.iter().map(|p| p.id).collect(),
        }
    }

    pub const fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check if the platform is tagged with `tag`. Unknown tags are an error.
    pub fn has(&self, tag: &str) -> Result<bool> {
        if !is_known_tag(tag) {
            return Err(Error::UnknownPlatformTag(tag.to_string()));
        }
        Ok(self.tags.iter().any(|t| t == tag))
    }

    pub fn is_mixed(&self) -> bool {
        !self.members.is_empty()
    }

    /// Ids of the physical platforms this platform stands for. A catalog platform stands for
    /// itself.
    pub fn constituent_ids(&self) -> Vec<u32> {
        if self.members.is_empty() {
            vec![self.id]
        } else {
            self.members.clone()
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

static PLATFORMS: LazyLock<Vec<Platform>> = LazyLock::new(|| {
    vec![
        Platform::new(6, "photon", "Photon", &["photon", "gen2", "wifi", "tcp"]),
        Platform::new(8, "p1", "P1", &["p1", "gen2", "wifi", "tcp"]),
        Platform::new(
            10,
            "electron",
            "Electron",
            &["electron", "gen2", "cellular", "udp"],
        ),
        Platform::new(12, "argon", "Argon", &["argon", "gen3", "wifi", "ble", "udp"]),
        Platform::new(
            13,
            "boron",
            "Boron",
            &["boron", "gen3", "cellular", "ble", "udp"],
        ),
        Platform::new(
            23,
            "bsom",
            "B SoM",
            &["bsom", "gen3", "som", "cellular", "ble", "udp"],
        ),
        Platform::new(
            25,
            "b5som",
            "B5 SoM",
            &["b5som", "gen3", "som", "cellular", "ble", "udp"],
        ),
        Platform::new(
            26,
            "tracker",
            "Tracker",
            &["tracker", "gen3", "som", "cellular", "ble", "udp", "gps"],
        ),
        Platform::new(32, "p2", "P2", &["p2", "gen3", "som", "wifi", "ble", "udp"]),
    ]
});

static PLATFORMS_BY_TAG: LazyLock<HashMap<&'static str, Vec<&'static Platform>>> =
    LazyLock::new(|| {
        let mut map: HashMap<&'static str, Vec<&'static Platform>> = HashMap::new();
        for p in PLATFORMS.iter() {
            for tag in &p.tags {
                map.entry(tag.as_str()).or_default().push(p);
            }
        }
        map
    });

/// All platforms of the catalog, ordered by id.
pub fn platforms() -> &'static [Platform] {
    &PLATFORMS
}

pub fn for_id(id: u32) -> Result<&'static Platform> {
    PLATFORMS
        .iter()
        .find(|p| p.id == id)
        .ok_or(Error::UnknownPlatformId(id))
}

pub fn is_known_id(id: u32) -> bool {
    PLATFORMS.iter().any(|p| p.id == id)
}

pub fn for_name(name: &str) -> Result<&'static Platform> {
    PLATFORMS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::UnknownPlatformName(name.to_string()))
}

pub fn for_tag(tag: &str) -> Result<&'static [&'static Platform]> {
    PLATFORMS_BY_TAG
        .get(tag)
        .map(Vec::as_slice)
        .ok_or_else(|| Error::UnknownPlatformTag(tag.to_string()))
}

pub fn is_known_tag(tag: &str) -> bool {
    PLATFORMS_BY_TAG.contains_key(tag)
}

/// Sorted set of every platform tag.
pub fn known_tags() -> BTreeSet<&'static str> {
    PLATFORMS_BY_TAG.keys().copied().collect()
}

/// Resolve a list of platform names and tags. The result is deduplicated and sorted by id.
pub fn parse_platforms<S: AsRef<str>>(names: &[S]) -> Result<Vec<&'static Platform>> {
    let mut res: Vec<&'static Platform> = Vec::new();
    for n in names {
        for p in for_tag(n.as_ref())? {
            if !res.iter().any(|x| x.id == p.id) {
                res.push(p);
            }
        }
    }
    res.sort_by_key(|p| p.id);
    Ok(res)
}
