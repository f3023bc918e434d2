//! ACL store: the authoritative rows for teams, folders, notes and shares

mod memory;
mod model;
mod repository;

pub use memory::MemoryAclStore;
pub use model::{
    Folder, FolderId, FolderShare, Note, NoteId, NoteShare, Roster, Share, ShareOutcome, Team,
    TeamId, UserId,
};
pub use repository::{FolderRepository, NoteRepository, TeamRepository, UserDirectory};
