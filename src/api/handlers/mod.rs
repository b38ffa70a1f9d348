mod admin;
mod albums;
mod objects;

pub use admin::{admin_purge, admin_reconcile, health};
pub use albums::{
    create_album, delete_album, delete_album_media, get_album, list_albums, update_album,
};
pub use objects::serve_object;
