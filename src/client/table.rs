//! Table reads and writes, with an in-memory cache for static tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{error, info};

use crate::client::{C1218Client, ClientError};
use crate::link::Link;
use crate::request::Request;
use crate::response::{ReadResponse, ResponseCode, ResponseError, split_status};

/// Which table service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOperation {
    Read,
    Write,
}

impl fmt::Display for TableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableOperation::Read => write!(f, "read"),
            TableOperation::Write => write!(f, "write"),
        }
    }
}

/// Table access failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The device answered with a non-zero status.
    Status { table_id: u16, operation: TableOperation, code: u8 },
    /// The read response failed validation.
    Malformed { table_id: u16, error: ResponseError },
}

impl TableError {
    pub fn table_id(&self) -> u16 {
        match self {
            TableError::Status { table_id, .. } | TableError::Malformed { table_id, .. } => {
                *table_id
            }
        }
    }

    /// True when the device reported an invalid service sequence state and
    /// the session has to be started again.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, TableError::Status { code, .. } if *code == ResponseCode::Isss as u8)
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Status { table_id, operation, code } => write!(
                f,
                "table {} {} failed with status 0x{:02X} ({})",
                table_id,
                operation,
                code,
                ResponseCode::describe(*code)
            ),
            TableError::Malformed { table_id, error } => {
                write!(f, "table {} read response invalid: {}", table_id, error)
            }
        }
    }
}

impl std::error::Error for TableError {}

/// Copies of whole tables read during the session.
#[derive(Debug, Clone, Default)]
pub struct TableCache {
    enabled: bool,
    cacheable: BTreeSet<u16>,
    tables: BTreeMap<u16, Vec<u8>>,
}

impl TableCache {
    pub fn new(enabled: bool, cacheable: BTreeSet<u16>) -> Self {
        Self { enabled, cacheable, tables: BTreeMap::new() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turning the cache off discards its contents.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.tables.clear();
        }
    }

    pub fn is_cacheable(&self, table_id: u16) -> bool {
        self.cacheable.contains(&table_id)
    }

    pub fn get(&self, table_id: u16) -> Option<&[u8]> {
        self.tables.get(&table_id).map(Vec::as_slice)
    }

    pub fn contains(&self, table_id: u16) -> bool {
        self.tables.contains_key(&table_id)
    }

    /// Serves a read from the cache.
    ///
    /// A full read returns the whole table; a partial read returns the
    /// requested window when it lies inside the cached copy.
    pub fn lookup(&self, table_id: u16, offset: Option<u32>, count: Option<u16>) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }
        let table = self.tables.get(&table_id)?;
        match (offset, count) {
            (None, None) => Some(table.clone()),
            (Some(offset), Some(count)) => {
                let start = offset as usize;
                let end = start.checked_add(count as usize)?;
                table.get(start..end).map(<[u8]>::to_vec)
            }
            _ => None,
        }
    }

    /// Stores a full table copy. Returns whether it was kept.
    pub fn insert(&mut self, table_id: u16, data: &[u8]) -> bool {
        if !self.enabled || !self.is_cacheable(table_id) {
            return false;
        }
        self.tables.insert(table_id, data.to_vec());
        true
    }

    pub fn flush(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl<L: Link> C1218Client<L> {
    /// Reads a table, or part of one when both `offset` and `count` are given.
    ///
    /// Cacheable tables are served from memory after the first full read.
    pub fn read_table(
        &mut self,
        table_id: u16,
        offset: Option<u32>,
        count: Option<u16>,
    ) -> Result<Vec<u8>, ClientError<L::Error>> {
        let request = Request::read(table_id, offset, count)?;

        if let Some(data) = self.cache.lookup(table_id, offset, count) {
            info!("table {} served from cache", table_id);
            return Ok(data);
        }

        let response = self.exchange(&request)?;
        let (status, body) = split_status(&response)
            .map_err(|error| TableError::Malformed { table_id, error })?;
        if status != ResponseCode::Ok as u8 {
            error!("table {} read failed: {}", table_id, ResponseCode::describe(status));
            return Err(TableError::Status { table_id, operation: TableOperation::Read, code: status }
                .into());
        }

        let ReadResponse { data } =
            ReadResponse::decode(body).map_err(|error| TableError::Malformed { table_id, error })?;

        if offset.is_none() && self.cache.insert(table_id, &data) {
            info!("table {} cached ({} bytes)", table_id, data.len());
        }

        Ok(data)
    }

    /// Writes a table, or part of one at `offset`. Cached copies are left
    /// untouched.
    pub fn write_table(
        &mut self,
        table_id: u16,
        data: &[u8],
        offset: Option<u32>,
    ) -> Result<(), ClientError<L::Error>> {
        let request = Request::write(table_id, data, offset)?;

        let response = self.exchange(&request)?;
        let (status, _) = split_status(&response)
            .map_err(|error| TableError::Malformed { table_id, error })?;
        if status != ResponseCode::Ok as u8 {
            error!("table {} write failed: {}", table_id, ResponseCode::describe(status));
            return Err(TableError::Status { table_id, operation: TableOperation::Write, code: status }
                .into());
        }

        Ok(())
    }

    /// Discards every cached table.
    pub fn flush_cache(&mut self) {
        info!("flushing {} cached tables", self.cache.len());
        self.cache.flush();
    }

    /// Enables or disables caching; disabling also flushes.
    pub fn set_cache_policy(&mut self, enabled: bool) {
        self.cache.set_enabled(enabled);
        self.settings.cache_enabled = enabled;
    }
}
