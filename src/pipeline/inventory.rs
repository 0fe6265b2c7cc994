use std::collections::BTreeMap;

use anyhow::Result;
use aws_smithy_types::date_time::Format;
use byte_unit::{Byte, UnitType};
use tracing::{debug, info};

use crate::config::{ListConfig, OperationKind};
use crate::location::Location;
use crate::pipeline::stage::Stage;
use crate::types::{ObjectInfo, OperationReport};

const LIST_OBJECT_NAME: &str = "LIST_OBJECT";
const DISK_USAGE_NAME: &str = "DISK_USAGE";
const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
const DIRECTORY_DELIMITER: char = '/';

/// One line of `ls` output.
#[derive(Debug, Clone, PartialEq)]
pub enum ListLine {
    Directory(String),
    Object {
        last_modified: String,
        size: String,
        e_tag: Option<String>,
        storage_class: Option<String>,
        path: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub objects: u64,
    pub bytes: u64,
}

/// Final stage of `ls` and `du`. Consumes the filtered listing of a single
/// location and writes it through tracing.
pub struct ObjectInventory {
    base: Stage<ObjectInfo, ()>,
    location: Location,
    list_config: ListConfig,
}

impl ObjectInventory {
    pub fn new(base: Stage<ObjectInfo, ()>, location: Location) -> Self {
        let list_config = base.config.list_config.unwrap_or_default();
        Self {
            base,
            location,
            list_config,
        }
    }

    pub async fn run(&self) -> Result<OperationReport> {
        let mut report = OperationReport::default();
        let mut last_directory = None;
        let mut usage = BTreeMap::<String, Usage>::new();

        loop {
            if self.base.cancellation_token.is_cancelled() {
                debug!("inventory has been cancelled.");
                break;
            }

            let Some(object) = self.base.recv().await? else {
                break;
            };

            report.succeeded += 1;
            report.bytes += object.size;

            match self.base.config.operation {
                OperationKind::DiskUsage => {
                    let entry = usage.entry(self.usage_group(&object)).or_default();
                    entry.objects += 1;
                    entry.bytes += object.size;
                }
                _ => {
                    if let Some(line) = self.list_line(&object, &mut last_directory) {
                        log_list_line(&line);
                    }
                }
            }
        }

        if self.base.config.operation == OperationKind::DiskUsage {
            for (storage_class, usage) in &usage {
                self.log_usage(storage_class, usage);
            }
            if usage.is_empty() {
                self.log_usage("", &Usage::default());
            }
        }

        Ok(report)
    }

    /// Objects below the first delimiter of their relative path collapse into
    /// one directory line, unless the location is a wildcard.
    /// Listing is sorted so each directory is contiguous.
    pub fn list_line(
        &self,
        object: &ObjectInfo,
        last_directory: &mut Option<String>,
    ) -> Option<ListLine> {
        if !self.location.is_wildcard() {
            if let Some((directory, _)) = object.relative_path.split_once(DIRECTORY_DELIMITER) {
                let directory = format!("{directory}{DIRECTORY_DELIMITER}");
                if last_directory.as_deref() == Some(directory.as_str()) {
                    return None;
                }
                *last_directory = Some(directory.clone());
                return Some(ListLine::Directory(directory));
            }
        }

        let path = if self.list_config.show_full_path {
            object.key.clone()
        } else {
            object.relative_path.clone()
        };

        Some(ListLine::Object {
            last_modified: object
                .last_modified
                .fmt(Format::DateTime)
                .unwrap_or_default(),
            size: format_size(object.size, self.list_config.humanize),
            e_tag: self
                .list_config
                .show_e_tag
                .then(|| object.e_tag.clone())
                .flatten(),
            storage_class: self
                .list_config
                .show_storage_class
                .then(|| storage_class_of(object)),
            path,
        })
    }

    fn usage_group(&self, object: &ObjectInfo) -> String {
        if self.list_config.group_by_storage_class {
            storage_class_of(object)
        } else {
            String::new()
        }
    }

    fn log_usage(&self, storage_class: &str, usage: &Usage) {
        let storage_class = (!storage_class.is_empty()).then_some(storage_class);
        info!(
            name = DISK_USAGE_NAME,
            location = self.location.to_string(),
            storage_class = storage_class,
            objects = usage.objects,
            size = format_size(usage.bytes, self.list_config.humanize),
        );
    }
}

fn log_list_line(line: &ListLine) {
    match line {
        ListLine::Directory(path) => {
            info!(name = LIST_OBJECT_NAME, kind = "DIR", path = path);
        }
        ListLine::Object {
            last_modified,
            size,
            e_tag,
            storage_class,
            path,
        } => {
            info!(
                name = LIST_OBJECT_NAME,
                last_modified = last_modified,
                size = size,
                e_tag = e_tag,
                storage_class = storage_class,
                path = path,
            );
        }
    }
}

fn storage_class_of(object: &ObjectInfo) -> String {
    object
        .storage_class
        .clone()
        .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string())
}

pub fn format_size(size: u64, humanize: bool) -> String {
    if !humanize {
        return size.to_string();
    }

    let adjusted = Byte::from_u64(size).get_appropriate_unit(UnitType::Binary);
    format!("{adjusted:.1}")
}
