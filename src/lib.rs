//! gdpack - game data packager
//!
//! Finds the files a game's data packages need among CDs, installers,
//! archives and existing installations, downloads what may be downloaded,
//! and hands complete packages over for assembly.

pub mod archive;
pub mod cancel;
pub mod config;
pub mod download;
pub mod hash;
pub mod model;
pub mod paths;
pub mod plugins;
pub mod resolver;
pub mod scan;
