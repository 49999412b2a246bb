/*!
# Vigil DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le test de l'agent Vigil avec:
- Stub du moteur de supervision (flux duplex, push de configuration)
- Builders de configurations d'agent
- Fixtures de systèmes de fichiers pour les checks natifs
*/

pub mod config_builder;
pub mod engine_stub;
pub mod fixtures;

pub use config_builder::ConfigBuilder;
pub use engine_stub::{status_points, EngineStub};
pub use fixtures::StaticFsStats;

/// Init du logging pour tests (idempotent)
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}
