use common::config::PAGE_SIZE;
use defines::error::KResult;

use super::{AnonPage, FilePage, FileSlice, PageKind, PageType};

/// 页第一次被访问时如何初始化
pub enum Initializer {
    /// 全零的匿名页
    Zeroed,
    /// 可执行文件的段，载入后成为匿名页，之后换出到交换区而非写回文件
    Segment(FileSlice),
    /// mmap 的一页，载入后成为文件页
    Mapping { slice: FileSlice, has_next: bool },
}

impl Initializer {
    pub fn target_type(&self) -> PageType {
        match self {
            Self::Zeroed | Self::Segment(_) => PageType::Anonymous,
            Self::Mapping { .. } => PageType::FileBacked,
        }
    }

    /// `bytes` 来自新分配的帧，本就是全零的
    pub(super) fn fill(&self, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        match self {
            Self::Zeroed => Ok(()),
            Self::Segment(slice) | Self::Mapping { slice, .. } => slice.load(bytes),
        }
    }

    pub(super) fn into_kind(self) -> PageKind {
        match self {
            Self::Zeroed | Self::Segment(_) => PageKind::Anonymous(AnonPage::new()),
            Self::Mapping { slice, has_next } => PageKind::FileBacked(FilePage::new(slice, has_next)),
        }
    }

    pub(crate) fn duplicate(&self) -> KResult<Self> {
        Ok(match self {
            Self::Zeroed => Self::Zeroed,
            Self::Segment(slice) => Self::Segment(slice.duplicate()?),
            Self::Mapping { slice, has_next } => Self::Mapping {
                slice: slice.duplicate()?,
                has_next: *has_next,
            },
        })
    }
}
