//! Product catalog: the server package, its items, prices and presets

use crate::api::{
    CATEGORY_OS, CATEGORY_PORT_SPEED, Datacenter, PUBLIC_CLOUD_SERVER, Preset, ProductItem,
    ProductPackage,
};
use crate::context::IbmContext;
use cloudplug_core::{CloudError, ResourceKind, Result};

/// Items every virtual server order carries besides image and port speed
pub const BASE_ITEMS: [&str; 7] = [
    "BANDWIDTH_0_GB_2",
    "1_IP_ADDRESS",
    "REBOOT_REMOTE_CONSOLE",
    "MONITORING_HOST_PING",
    "NOTIFICATION_EMAIL_AND_TICKET",
    "AUTOMATED_NOTIFICATION",
    "UNLIMITED_SSL_VPN_USERS_1_PPTP_VPN_USER_PER_ACCOUNT",
];

/// Uplink speed ordered with every guest, in Mbps
pub const PORT_SPEED_MBPS: &str = "100";

pub fn category(item: &ProductItem) -> Option<&str> {
    item.item_category.as_ref().and_then(|c| c.category_code.as_deref())
}

/// OS items that can actually be ordered.
pub fn is_os_image(item: &ProductItem) -> bool {
    category(item) == Some(CATEGORY_OS)
        && item.active_usage_price_count.unwrap_or(0) > 0
        && !item.capacity_restricted_product_flag.unwrap_or(false)
}

/// The price that is valid in every location.
pub fn standard_price(item: &ProductItem) -> Option<i64> {
    item.prices
        .iter()
        .find(|p| p.location_group_id.is_none())
        .and_then(|p| p.id)
}

pub async fn public_package(ctx: &IbmContext) -> Result<i64> {
    ctx.call(
        ResourceKind::Order,
        PUBLIC_CLOUD_SERVER,
        "getAllObjects",
        ctx.api.list_product_packages(PUBLIC_CLOUD_SERVER),
    )
    .await?
    .iter()
    .find_map(|p: &ProductPackage| p.id)
    .ok_or_else(|| CloudError::not_found(ResourceKind::Order, PUBLIC_CLOUD_SERVER))
}

pub async fn items(ctx: &IbmContext, package_id: i64) -> Result<Vec<ProductItem>> {
    ctx.call(
        ResourceKind::Order,
        PUBLIC_CLOUD_SERVER,
        "getItems",
        ctx.api.list_items(package_id),
    )
    .await
}

pub async fn os_images(ctx: &IbmContext) -> Result<Vec<ProductItem>> {
    let package_id = public_package(ctx).await?;
    Ok(items(ctx, package_id)
        .await?
        .into_iter()
        .filter(is_os_image)
        .collect())
}

pub async fn find_preset(ctx: &IbmContext, package_id: i64, key_name: &str) -> Result<Preset> {
    ctx.call(
        ResourceKind::VmSpec,
        key_name,
        "getActivePresets",
        ctx.api.list_active_presets(package_id),
    )
    .await?
    .into_iter()
    .find(|p| p.key_name.as_deref() == Some(key_name))
    .ok_or_else(|| CloudError::not_found(ResourceKind::VmSpec, key_name))
}

/// The connection's datacenter, with its numeric id.
pub async fn datacenter(ctx: &IbmContext) -> Result<Datacenter> {
    let name = ctx.datacenter();
    ctx.call(ResourceKind::Order, name, "getDatacenters", ctx.api.list_datacenters(Some(name)))
        .await?
        .into_iter()
        .find(|d| d.name.as_deref() == Some(name) && d.id.is_some())
        .ok_or_else(|| CloudError::not_found(ResourceKind::Order, format!("datacenter {}", name)))
}

/// Price ids for a guest running `image`: the public uplink, the image and
/// the base items.
pub fn order_prices(items: &[ProductItem], image: &str) -> Result<Vec<i64>> {
    let missing = |what: &str| CloudError::not_found(ResourceKind::Order, format!("price for {}", what));

    let port_speed = items
        .iter()
        .find(|i| {
            category(i) == Some(CATEGORY_PORT_SPEED)
                && !i.private_network_only
                && i.capacity.as_deref() == Some(PORT_SPEED_MBPS)
        })
        .and_then(standard_price)
        .ok_or_else(|| missing("public port speed"))?;

    let image_price = items
        .iter()
        .find(|i| i.key_name.as_deref() == Some(image) && category(i) == Some(CATEGORY_OS))
        .and_then(standard_price)
        .ok_or_else(|| missing(image))?;

    let mut prices = vec![port_speed, image_price];
    for key in BASE_ITEMS {
        let price = items
            .iter()
            .find(|i| i.key_name.as_deref() == Some(key))
            .and_then(standard_price)
            .ok_or_else(|| missing(key))?;
        prices.push(price);
    }
    Ok(prices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeSoftLayer;
    use cloudplug_core::Scope;
    use std::sync::Arc;

    fn ctx() -> IbmContext {
        IbmContext::new(Arc::new(FakeSoftLayer::seeded()), Scope::region("dal10")).unwrap()
    }

    #[tokio::test]
    async fn test_order_prices_use_standard_prices() {
        let ctx = ctx();
        let package = public_package(&ctx).await.unwrap();
        let items = items(&ctx, package).await.unwrap();
        let prices = order_prices(&items, "OS_UBUNTU_22_04_LTS_JAMMY_JELLYFISH_64_BIT").unwrap();

        assert_eq!(prices.len(), 2 + BASE_ITEMS.len());
        // 100 Mbps public uplink, then the image
        assert_eq!(&prices[..2], &[310, 400]);
    }

    #[tokio::test]
    async fn test_unknown_image_has_no_price() {
        let ctx = ctx();
        let items = items(&ctx, public_package(&ctx).await.unwrap()).await.unwrap();
        let err = order_prices(&items, "OS_NONE").unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_os_images_skip_restricted_items() {
        let mut restricted = ProductItem {
            id: Some(41),
            key_name: Some("OS_RESTRICTED".into()),
            active_usage_price_count: Some(1),
            capacity_restricted_product_flag: Some(true),
            ..Default::default()
        };
        restricted.item_category = Some(crate::api::ItemCategory {
            category_code: Some(CATEGORY_OS.into()),
            ..Default::default()
        });
        let fake = FakeSoftLayer::seeded().with_item(restricted);
        let ctx = IbmContext::new(Arc::new(fake), Scope::region("dal10")).unwrap();

        let images = os_images(&ctx).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, Some(40));
    }

    #[tokio::test]
    async fn test_datacenter_and_preset() {
        let ctx = ctx();
        assert_eq!(datacenter(&ctx).await.unwrap().id, Some(crate::fake::DATACENTER_ID));
        let package = public_package(&ctx).await.unwrap();
        assert_eq!(find_preset(&ctx, package, "B1_1X2X25").await.unwrap().id, Some(900));
        assert!(find_preset(&ctx, package, "B1_64X512").await.unwrap_err().is_not_found());
    }
}
