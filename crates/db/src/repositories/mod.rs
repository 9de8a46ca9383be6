mod entity_repo;

pub use entity_repo::EntityRepo;
