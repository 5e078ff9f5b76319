//! Column type tags stored in the ZDW file schema.
//!
//! The numeric values are wire format -- do not renumber. `VisidLow` and
//! `VisidHigh` only occur in files older than version 8; they are decoded
//! but never produced. The two virtual types exist only in memory (they are
//! materialized at decode time and have no storage in the file).

use crate::error::ZdwError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    Varchar = 0,
    Text = 1,
    Datetime = 2,
    Char2 = 3,
    VisidLow = 4,
    VisidHigh = 5,
    Char = 6,
    Tiny = 7,
    Short = 8,
    Long = 9,
    LongLong = 10,
    Decimal = 11,
    TinySigned = 12,
    ShortSigned = 13,
    LongSigned = 14,
    LongLongSigned = 15,
    TinyText = 16,
    MediumText = 17,
    LongText = 18,
    VirtualExportBaseName = 64,
    VirtualExportRow = 65,
}

impl ColumnType {
    pub fn from_u8(v: u8) -> Result<Self, ZdwError> {
        Ok(match v {
            0 => Self::Varchar,
            1 => Self::Text,
            2 => Self::Datetime,
            3 => Self::Char2,
            4 => Self::VisidLow,
            5 => Self::VisidHigh,
            6 => Self::Char,
            7 => Self::Tiny,
            8 => Self::Short,
            9 => Self::Long,
            10 => Self::LongLong,
            11 => Self::Decimal,
            12 => Self::TinySigned,
            13 => Self::ShortSigned,
            14 => Self::LongSigned,
            15 => Self::LongLongSigned,
            16 => Self::TinyText,
            17 => Self::MediumText,
            18 => Self::LongText,
            64 => Self::VirtualExportBaseName,
            65 => Self::VirtualExportRow,
            other => {
                return Err(ZdwError::CorruptedData(format!(
                    "unknown column type tag {other}"
                )))
            }
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Types whose non-empty values live in the block dictionary.
    #[inline]
    pub fn is_string_like(self) -> bool {
        matches!(
            self,
            Self::Varchar
                | Self::Text
                | Self::TinyText
                | Self::MediumText
                | Self::LongText
                | Self::Datetime
                | Self::Char2
                | Self::Decimal
        )
    }

    /// Integer types, signed or unsigned.
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Tiny
                | Self::TinySigned
                | Self::Short
                | Self::ShortSigned
                | Self::Long
                | Self::LongSigned
                | Self::LongLong
                | Self::LongLongSigned
        )
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::TinySigned | Self::ShortSigned | Self::LongSigned | Self::LongLongSigned
        )
    }

    #[inline]
    pub fn is_virtual(self) -> bool {
        matches!(self, Self::VirtualExportBaseName | Self::VirtualExportRow)
    }

    /// SQL-ish type text for `.desc` sidecar output. `char_size` is the
    /// recorded width for `Varchar` (0 for pre-v7 files, rendered as 255).
    pub fn sql_desc(self, char_size: u16) -> String {
        match self {
            Self::Varchar | Self::VirtualExportBaseName => {
                let size = if char_size != 0 { char_size } else { 255 };
                format!("varchar({size})")
            }
            Self::Text => "text".into(),
            Self::TinyText => "tinytext".into(),
            Self::MediumText => "mediumtext".into(),
            Self::LongText => "longtext".into(),
            Self::Datetime => "datetime".into(),
            Self::Char2 => "char(2)".into(),
            Self::Char => "char(1)".into(),
            Self::VisidLow | Self::VisidHigh => "bigint(20) unsigned".into(),
            Self::Tiny => "tinyint(3) unsigned".into(),
            Self::Short => "smallint(5) unsigned".into(),
            Self::Long | Self::VirtualExportRow => "int(11) unsigned".into(),
            Self::LongLong => "bigint(20) unsigned".into(),
            Self::TinySigned => "tinyint(3)".into(),
            Self::ShortSigned => "smallint(5)".into(),
            Self::LongSigned => "int(11)".into(),
            Self::LongLongSigned => "bigint(20)".into(),
            Self::Decimal => "decimal(24,12)".into(),
        }
    }
}

/// Name under which the export-file basename virtual column is requested.
pub const VIRTUAL_EXPORT_BASENAME_COLUMN_NAME: &str = "virtual_export_basename";
/// Name under which the export-row-number virtual column is requested.
pub const VIRTUAL_EXPORT_ROW_COLUMN_NAME: &str = "virtual_export_row";
