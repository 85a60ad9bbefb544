use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("module not found: {0}")]
pub struct ModuleNotFoundError(pub String);

/// A named, contiguous region loaded into a target process.
///
/// Regions are snapshots. If the target maps or unmaps modules afterwards the
/// region may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    name: String,
    base: u64,
    size: u64,
    permissions: String,
}

impl MemoryRegion {
    /// Returns `None` if `base + size` would overflow the address space.
    pub fn new(
        name: impl Into<String>,
        base: u64,
        size: u64,
        permissions: impl Into<String>,
    ) -> Option<Self> {
        base.checked_add(size)?;

        Some(Self {
            name: name.into(),
            base,
            size,
            permissions: permissions.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Permission string as reported by the OS, e.g. `r-xp`.
    pub fn permissions(&self) -> &str {
        &self.permissions
    }

    /// First address past the region.
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Absolute address of `offset` into the region, if it lies inside it.
    pub fn address_of(&self, offset: u64) -> Option<u64> {
        if offset < self.size {
            Some(self.base + offset)
        } else {
            None
        }
    }

    pub fn is_readable(&self) -> bool {
        self.flag(0, b'r')
    }

    pub fn is_writable(&self) -> bool {
        self.flag(1, b'w')
    }

    pub fn is_executable(&self) -> bool {
        self.flag(2, b'x')
    }

    fn flag(&self, index: usize, expected: u8) -> bool {
        self.permissions.as_bytes().get(index) == Some(&expected)
    }
}

/// Module name to region lookup for one attached process.
///
/// Keys are the last path component of the backing file, matched exactly and
/// case-sensitively. When a module shows up more than once the last entry
/// wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionDirectory {
    regions: HashMap<String, MemoryRegion>,
}

impl RegionDirectory {
    pub fn from_regions(regions: impl IntoIterator<Item = MemoryRegion>) -> Self {
        let mut directory = Self::default();

        for region in regions {
            directory.regions.insert(region.name.clone(), region);
        }

        directory
    }

    /// Builds a directory from the text of a `/proc/<pid>/maps` file.
    ///
    /// Only executable mappings are kept. Lines that do not parse are skipped.
    pub fn parse_maps(maps: &str) -> Self {
        Self::from_regions(maps.lines().filter_map(parse_map_line))
    }

    pub fn get(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.get(name)
    }

    pub fn find(&self, name: &str) -> Result<&MemoryRegion, ModuleNotFoundError> {
        self.get(name).ok_or_else(|| ModuleNotFoundError(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }
}

/// Splits off the next whitespace-delimited field, returning it and the rest.
fn next_field(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    if line.is_empty() {
        return None;
    }

    let end = line.find(char::is_whitespace).unwrap_or(line.len());
    Some(line.split_at(end))
}

// address           perms offset  dev   inode   pathname
// 7f0000000000-7f0000001000 r-xp 00000000 00:00 0  /lib/libtest.so
fn parse_map_line(line: &str) -> Option<MemoryRegion> {
    let (range, rest) = next_field(line)?;
    let (permissions, rest) = next_field(rest)?;
    let (offset, rest) = next_field(rest)?;
    let (_device, rest) = next_field(rest)?;
    let (_inode, rest) = next_field(rest)?;

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    u64::from_str_radix(offset, 16).ok()?;

    if start == 0 || end <= start {
        return None;
    }

    if permissions.as_bytes().get(2) != Some(&b'x') {
        return None;
    }

    let path = rest.trim();
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.is_empty() {
        return None;
    }

    MemoryRegion::new(name, start, end - start, permissions)
}
