//! Command identities
//!
//! Every supported command has a stable string form used in log tags and in
//! request parameters for endpoints that key behavior by command.

use std::fmt;

/// Closed set of supported commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdType {
    CreateDb,
    DropDb,
    StartDb,
    StopDb,
    AddNode,
    RemoveNode,
    StartNode,
    StopNode,
    RestartNode,
    AddSubcluster,
    RemoveSubcluster,
    StopSubcluster,
    StartSubcluster,
    SandboxSubcluster,
    UnsandboxSubcluster,
    ShowRestorePoints,
    SaveRestorePoint,
    InstallPackages,
    ManageConfigRecover,
    GetDrainingStatus,
    ManageConnectionDraining,
    SetConfigurationParameter,
    ReplicationStart,
    PromoteSandboxToMain,
    FetchNodesDetails,
    AlterSubclusterType,
    RenameSubcluster,
    ReIp,
    Scrutinize,
    CreateDbSyncCat,
    StartDbSyncCat,
    StopDbSyncCat,
    StopScSyncCat,
    AddNodeSyncCat,
    StartNodeSyncCat,
    RemoveNodeSyncCat,
    CreateArchive,
    PollSubclusterState,
    UpgradeLicense,
}

impl CmdType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CmdType::CreateDb => "create_db",
            CmdType::DropDb => "drop_db",
            CmdType::StartDb => "start_db",
            CmdType::StopDb => "stop_db",
            CmdType::AddNode => "add_node",
            CmdType::RemoveNode => "remove_node",
            CmdType::StartNode => "start_node",
            CmdType::StopNode => "stop_node",
            CmdType::RestartNode => "restart_node",
            CmdType::AddSubcluster => "add_subcluster",
            CmdType::RemoveSubcluster => "remove_subcluster",
            CmdType::StopSubcluster => "stop_subcluster",
            CmdType::StartSubcluster => "start_subcluster",
            CmdType::SandboxSubcluster => "sandbox_subcluster",
            CmdType::UnsandboxSubcluster => "unsandbox_subcluster",
            CmdType::ShowRestorePoints => "show_restore_points",
            CmdType::SaveRestorePoint => "save_restore_point",
            CmdType::InstallPackages => "install_packages",
            CmdType::ManageConfigRecover => "manage_config_recover",
            CmdType::GetDrainingStatus => "get_draining_status",
            CmdType::ManageConnectionDraining => "manage_connection_draining",
            CmdType::SetConfigurationParameter => "set_configuration_parameter",
            CmdType::ReplicationStart => "replication_start",
            CmdType::PromoteSandboxToMain => "promote_sandbox_to_main",
            CmdType::FetchNodesDetails => "fetch_nodes_details",
            CmdType::AlterSubclusterType => "alter_subcluster_type",
            CmdType::RenameSubcluster => "rename_subcluster",
            CmdType::ReIp => "re_ip",
            CmdType::Scrutinize => "scrutinize",
            CmdType::CreateDbSyncCat => "create_db_sync_cat",
            CmdType::StartDbSyncCat => "start_db_sync_cat",
            CmdType::StopDbSyncCat => "stop_db_sync_cat",
            CmdType::StopScSyncCat => "stop_sc_sync_cat",
            CmdType::AddNodeSyncCat => "add_node_sync_cat",
            CmdType::StartNodeSyncCat => "start_node_sync_cat",
            CmdType::RemoveNodeSyncCat => "remove_node_sync_cat",
            CmdType::CreateArchive => "create_archive",
            CmdType::PollSubclusterState => "poll_subcluster_state",
            CmdType::UpgradeLicense => "upgrade_license",
        }
    }

    /// Commands whose operations must force a catalog sync when composing
    /// request parameters.
    pub const fn is_sync_cat(&self) -> bool {
        matches!(
            self,
            CmdType::CreateDbSyncCat
                | CmdType::StartDbSyncCat
                | CmdType::StopDbSyncCat
                | CmdType::StopScSyncCat
                | CmdType::AddNodeSyncCat
                | CmdType::StartNodeSyncCat
                | CmdType::RemoveNodeSyncCat
        )
    }
}

impl fmt::Display for CmdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_forms_are_stable() {
        assert_eq!(CmdType::CreateDb.as_str(), "create_db");
        assert_eq!(CmdType::ManageConnectionDraining.as_str(), "manage_connection_draining");
        assert_eq!(CmdType::PromoteSandboxToMain.as_str(), "promote_sandbox_to_main");
        assert_eq!(CmdType::StopScSyncCat.as_str(), "stop_sc_sync_cat");
        assert_eq!(CmdType::UpgradeLicense.to_string(), "upgrade_license");
    }

    #[test]
    fn sync_cat_commands_are_flagged() {
        assert!(CmdType::CreateDbSyncCat.is_sync_cat());
        assert!(CmdType::StopScSyncCat.is_sync_cat());
        assert!(!CmdType::CreateDb.is_sync_cat());
        assert!(!CmdType::Scrutinize.is_sync_cat());
    }
}
