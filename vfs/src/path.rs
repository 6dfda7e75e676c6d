//! `N:\dir\file` path parsing. Forward and backward slashes are
//! interchangeable; the numeric volume prefix is mandatory.

use alloc::vec::Vec;

use crate::VfsError;

#[derive(Debug)]
pub(crate) struct ParsedPath<'a> {
    pub volume: usize,
    pub components: Vec<&'a str>,
}

pub(crate) fn parse(path: &str) -> Result<ParsedPath<'_>, VfsError> {
    let colon = path.find(':').ok_or(VfsError::InvalidPath)?;
    let volume: usize = path[..colon].parse().map_err(|_| VfsError::InvalidPath)?;

    let mut components = Vec::new();
    for component in path[colon + 1..].split(['/', '\\']) {
        if component.is_empty() {
            continue;
        }
        // relative components are not resolved, so a path always names
        // the same node regardless of what else exists
        if component == "." || component == ".." {
            return Err(VfsError::InvalidPath);
        }
        components.push(component);
    }
    Ok(ParsedPath { volume, components })
}
