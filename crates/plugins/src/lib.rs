pub mod pugme;

use nobot_xmpp::PluginCatalog;

pub use pugme::{PugError, PugMe};

/// Every built-in plugin, keyed by the identifier used in `[plugins] enabled`.
pub fn builtin_catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    pugme::register(&mut catalog, pugme::DEFAULT_ENDPOINT);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_offers_pugme() {
        let catalog = builtin_catalog();
        assert!(catalog.contains(pugme::PLUGIN_ID));
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["pugme"]);
    }
}
