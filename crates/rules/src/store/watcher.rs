//! Filesystem event handler for the profile document watcher.

use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind};
use tracing::{info, warn};

use super::core::{retain_valid, DocumentFormat, ProfileMap};

pub(super) fn handle_fs_event(
    event: &Event,
    profiles: &Arc<RwLock<ProfileMap>>,
    document: &Path,
    format: DocumentFormat,
) {
    let touches_document = event.paths.iter().any(|p| p.file_name() == document.file_name());
    if !touches_document {
        return;
    }

    match &event.kind {
        EventKind::Create(CreateKind::File)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Name(_)) => {}
        _ => return,
    }

    let contents = match fs::read_to_string(document) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %document.display(), error = %e, "failed to read profile document during hot-reload");
            return;
        }
    };

    match format.parse(&contents) {
        Ok(parsed) => {
            let valid = retain_valid(parsed, document);
            let count = valid.len();
            *profiles.write().expect("profiles lock poisoned") = valid;
            info!(path = %document.display(), profiles = count, "hot-reloaded filter profiles");
        }
        Err(e) => {
            warn!(
                path = %document.display(),
                error = %e,
                "failed to parse profile document during hot-reload, keeping previous version"
            );
        }
    }
}
