// Services module - orchestration on top of the provider clients

pub mod normalize;
pub mod reconcile;
pub mod sources;

pub use reconcile::EpisodeReconciler;
pub use sources::SourceResolver;
