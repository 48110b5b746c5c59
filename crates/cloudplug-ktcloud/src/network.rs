//! Public IPs, port forwarding and firewall rules
//!
//! KT Cloud VMs sit on a private network. Reaching one from outside takes a
//! public IP plus one port-forwarding rule per opened port range; ICMP can
//! only be opened with a firewall rule on the IP itself. Security-group
//! rules are turned into those objects here.

use crate::api::{
    AssociateIpRequest, FirewallRuleRequest, PortForwardingRequest, PublicIp, PublicIpFilter,
    RuleFilter,
};
use crate::context::KtContext;
use crate::polling::{wait_for_cleanup_job, wait_for_job};
use cloudplug_core::model::{Direction, SecurityRule};
use cloudplug_core::{CloudError, ResourceKind, Result};

pub const USAGE_PLAN: &str = "hourly";

/// What one inbound security rule becomes on the public IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkRule {
    PortForwarding {
        protocol: &'static str,
        from_port: String,
        to_port: String,
    },
    IcmpFirewall { cidr: String },
}

fn protocol_of(rule: &SecurityRule) -> Result<&'static str> {
    match rule.ip_protocol.to_ascii_lowercase().as_str() {
        "tcp" => Ok("TCP"),
        "udp" => Ok("UDP"),
        "icmp" => Ok("ICMP"),
        other => Err(CloudError::validation(
            ResourceKind::SecurityGroup,
            format!("protocol '{}' is not supported, use tcp, udp or icmp", other),
        )),
    }
}

/// Converts security rules to network rules. Outbound rules have no
/// counterpart on KT Cloud and are skipped.
pub fn plan_rules(rules: &[SecurityRule]) -> Result<Vec<NetworkRule>> {
    let mut planned = Vec::new();
    for rule in rules.iter().filter(|r| r.direction == Direction::Inbound) {
        let protocol = protocol_of(rule)?;
        if protocol == "ICMP" {
            planned.push(NetworkRule::IcmpFirewall {
                cidr: rule.cidr_or_any().to_string(),
            });
            continue;
        }

        let (from_port, to_port) = if rule.from_port == "-1" && rule.to_port == "-1" {
            ("1".to_string(), "65535".to_string())
        } else {
            (rule.from_port.clone(), rule.to_port.clone())
        };
        planned.push(NetworkRule::PortForwarding {
            protocol,
            from_port,
            to_port,
        });
    }
    Ok(planned)
}

/// Allocates a public IP in the connection's zone.
pub async fn associate_public_ip(ctx: &KtContext, vm_name: &str) -> Result<PublicIp> {
    let request = AssociateIpRequest {
        zone_id: ctx.zone_id().to_string(),
        usage_plan_type: USAGE_PLAN.to_string(),
    };
    let handle = ctx
        .call(ResourceKind::PublicIp, vm_name, "associateIpAddress", ctx.api.associate_ip_address(&request))
        .await?;
    wait_for_job(ctx, ResourceKind::PublicIp, vm_name, &handle, ctx.presets.async_job).await?;

    let ip_id = handle
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CloudError::provider(ResourceKind::PublicIp, vm_name, "associateIpAddress", "no public IP id returned"))?;
    let filter = PublicIpFilter {
        id: Some(ip_id.clone()),
        ..Default::default()
    };
    ctx.call(ResourceKind::PublicIp, &ip_id, "listPublicIpAddresses", ctx.api.list_public_ip_addresses(&filter))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::not_found(ResourceKind::PublicIp, ip_id))
}

pub async fn disassociate_public_ip(ctx: &KtContext, ip_id: &str) -> Result<()> {
    let handle = ctx
        .call(ResourceKind::PublicIp, ip_id, "disassociateIpAddress", ctx.api.disassociate_ip_address(ip_id))
        .await?;
    wait_for_cleanup_job(ctx, ResourceKind::PublicIp, ip_id, &handle, ctx.presets.async_job).await
}

/// Opens one rule on `ip_id` and returns the id of the created rule.
pub async fn apply_rule(ctx: &KtContext, ip_id: &str, vm_id: &str, rule: &NetworkRule) -> Result<String> {
    match rule {
        NetworkRule::PortForwarding {
            protocol,
            from_port,
            to_port,
        } => {
            let request = PortForwardingRequest {
                ip_address_id: ip_id.to_string(),
                protocol: protocol.to_string(),
                private_port: from_port.clone(),
                private_end_port: to_port.clone(),
                public_port: from_port.clone(),
                public_end_port: to_port.clone(),
                virtual_machine_id: vm_id.to_string(),
                open_firewall: true,
            };
            let handle = ctx
                .call(
                    ResourceKind::PortForwardingRule,
                    vm_id,
                    "createPortForwardingRule",
                    ctx.api.create_port_forwarding_rule(&request),
                )
                .await?;
            wait_for_job(ctx, ResourceKind::PortForwardingRule, vm_id, &handle, ctx.presets.async_job).await?;
            Ok(handle.id.unwrap_or_default())
        }
        NetworkRule::IcmpFirewall { cidr } => {
            let request = FirewallRuleRequest {
                ip_address_id: ip_id.to_string(),
                protocol: "ICMP".to_string(),
                cidr_list: cidr.clone(),
                start_port: None,
                end_port: None,
                rule_type: "user".to_string(),
            };
            let handle = ctx
                .call(ResourceKind::FirewallRule, vm_id, "createFirewallRule", ctx.api.create_firewall_rule(&request))
                .await?;
            wait_for_job(ctx, ResourceKind::FirewallRule, vm_id, &handle, ctx.presets.async_job).await?;
            Ok(handle.id.unwrap_or_default())
        }
    }
}

pub async fn delete_port_forwarding_rule(ctx: &KtContext, rule_id: &str) -> Result<()> {
    let handle = ctx
        .call(
            ResourceKind::PortForwardingRule,
            rule_id,
            "deletePortForwardingRule",
            ctx.api.delete_port_forwarding_rule(rule_id),
        )
        .await?;
    wait_for_cleanup_job(ctx, ResourceKind::PortForwardingRule, rule_id, &handle, ctx.presets.async_job).await
}

pub async fn delete_firewall_rule(ctx: &KtContext, rule_id: &str) -> Result<()> {
    let handle = ctx
        .call(ResourceKind::FirewallRule, rule_id, "deleteFirewallRule", ctx.api.delete_firewall_rule(rule_id))
        .await?;
    wait_for_cleanup_job(ctx, ResourceKind::FirewallRule, rule_id, &handle, ctx.presets.async_job).await
}

/// Removes a rule created by [`apply_rule`].
pub async fn revoke_rule(ctx: &KtContext, rule: &NetworkRule, rule_id: &str) -> Result<()> {
    match rule {
        NetworkRule::PortForwarding { .. } => delete_port_forwarding_rule(ctx, rule_id).await,
        NetworkRule::IcmpFirewall { .. } => delete_firewall_rule(ctx, rule_id).await,
    }
}

/// Deletes every firewall and port-forwarding rule on the IP with
/// `address`, then releases the IP. Missing IPs are skipped.
pub async fn release_public_address(ctx: &KtContext, address: &str) -> Result<()> {
    let filter = PublicIpFilter {
        ip_address: Some(address.to_string()),
        ..Default::default()
    };
    let Some(ip_id) = ctx
        .call(ResourceKind::PublicIp, address, "listPublicIpAddresses", ctx.api.list_public_ip_addresses(&filter))
        .await?
        .into_iter()
        .find_map(|ip| ip.id)
    else {
        tracing::warn!(address, "public IP already released");
        return Ok(());
    };
    release_public_ip(ctx, &ip_id).await
}

/// Deletes every firewall and port-forwarding rule on `ip_id`, then
/// releases the IP.
pub async fn release_public_ip(ctx: &KtContext, ip_id: &str) -> Result<()> {
    let by_ip = RuleFilter {
        ip_address_id: Some(ip_id.to_string()),
        ..Default::default()
    };

    let firewall = ctx
        .call(ResourceKind::FirewallRule, ip_id, "listFirewallRules", ctx.api.list_firewall_rules(&by_ip))
        .await?;
    for rule_id in firewall.into_iter().filter_map(|r| r.id) {
        delete_firewall_rule(ctx, &rule_id).await?;
    }

    let forwarding = ctx
        .call(
            ResourceKind::PortForwardingRule,
            ip_id,
            "listPortForwardingRules",
            ctx.api.list_port_forwarding_rules(&by_ip),
        )
        .await?;
    for rule_id in forwarding.into_iter().filter_map(|r| r.id) {
        delete_port_forwarding_rule(ctx, &rule_id).await?;
    }

    disassociate_public_ip(ctx, ip_id).await
}
