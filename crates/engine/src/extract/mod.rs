// ABOUTME: Extractor collaborators, one per source type, behind a common extract contract.
// ABOUTME: Selected by the SourceType enumeration in the dispatcher, never by runtime inspection.

//! One extractor per source kind.
//!
//! Each submodule exposes a single async
//! `extract(client, source, opts) -> Result<Vec<RawRecord>, ExtractionError>`
//! operation. The dispatcher selects a module by the source's declared type;
//! filters and projection are applied centrally afterwards, not here.

pub mod api;
pub mod csv;
pub mod excel;
pub mod html;
pub mod pdf;
pub mod scraper;
