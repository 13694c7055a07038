use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Serialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamMember {
    pub id: String,
    pub team_id: String,
    pub user_id: String,
    pub role_id: Option<String>,
    pub status: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RoleKind {
    Default,
    Custom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitePermissions {
    pub view: bool,
    pub create: bool,
    pub edit: bool,
    pub delete: bool,
    pub share: bool,
    pub manage_plugins: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginPermissions {
    pub view: bool,
    pub create: bool,
    pub edit: bool,
    pub delete: bool,
    pub share: bool,
    pub install: bool,
    pub uninstall: bool,
    pub activate: bool,
    pub deactivate: bool,
    pub manage_versions: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberPermissions {
    pub view: bool,
    pub invite: bool,
    pub edit: bool,
    pub remove: bool,
    pub manage_roles: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamPermissions {
    pub view: bool,
    pub edit_settings: bool,
    pub manage_roles: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePermissions {
    #[serde(default)]
    pub sites: SitePermissions,
    #[serde(default)]
    pub plugins: PluginPermissions,
    #[serde(default)]
    pub members: MemberPermissions,
    #[serde(default)]
    pub team: TeamPermissions,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamRole {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: RoleKind,
    pub permissions: RolePermissions,
    pub created_at: DateTime<Utc>,
}

/// Role template before it is stored for a team
#[derive(Debug, Clone)]
pub struct RoleTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: RolePermissions,
}

pub const OWNER_ROLE: &str = "Owner";
pub const ADMIN_ROLE: &str = "Admin";

/// The four roles every team starts with, most privileged first
pub fn default_team_roles() -> Vec<RoleTemplate> {
    let full_sites = SitePermissions {
        view: true,
        create: true,
        edit: true,
        delete: true,
        share: true,
        manage_plugins: true,
    };
    let full_plugins = PluginPermissions {
        view: true,
        create: true,
        edit: true,
        delete: true,
        share: true,
        install: true,
        uninstall: true,
        activate: true,
        deactivate: true,
        manage_versions: true,
    };
    let full_members = MemberPermissions {
        view: true,
        invite: true,
        edit: true,
        remove: true,
        manage_roles: true,
    };
    let full_team = TeamPermissions {
        view: true,
        edit_settings: true,
        manage_roles: true,
    };
    let full = RolePermissions {
        sites: full_sites.clone(),
        plugins: full_plugins.clone(),
        members: full_members.clone(),
        team: full_team,
    };

    vec![
        RoleTemplate {
            name: OWNER_ROLE,
            description: "Team owner with full control. Cannot be removed or edited.",
            permissions: full.clone(),
        },
        RoleTemplate {
            name: ADMIN_ROLE,
            description: "Everything a Manager can do, plus custom roles and team settings.",
            permissions: full,
        },
        RoleTemplate {
            name: "Manager",
            description: "Everything a Member can do, plus managing team sites, plugins and members.",
            permissions: RolePermissions {
                sites: full_sites,
                plugins: PluginPermissions {
                    manage_versions: false,
                    ..full_plugins
                },
                members: MemberPermissions {
                    manage_roles: false,
                    ..full_members
                },
                team: TeamPermissions {
                    view: true,
                    ..Default::default()
                },
            },
        },
        RoleTemplate {
            name: "Member",
            description: "Can view team sites and plugins and activate or deactivate plugins on team sites.",
            permissions: RolePermissions {
                sites: SitePermissions {
                    view: true,
                    manage_plugins: true,
                    ..Default::default()
                },
                plugins: PluginPermissions {
                    view: true,
                    activate: true,
                    deactivate: true,
                    ..Default::default()
                },
                members: MemberPermissions {
                    view: true,
                    ..Default::default()
                },
                team: TeamPermissions {
                    view: true,
                    ..Default::default()
                },
            },
        },
    ]
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roles() {
        let roles = default_team_roles();
        let names: Vec<_> = roles.iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Owner", "Admin", "Manager", "Member"]);

        let manager = &roles[2].permissions;
        assert!(manager.members.invite);
        assert!(!manager.members.manage_roles);
        assert!(!manager.plugins.manage_versions);

        let member = &roles[3].permissions;
        assert!(member.plugins.activate);
        assert!(!member.plugins.install);
        assert!(!member.sites.delete);
    }

    #[test]
    fn test_permissions_json_shape() {
        let json = serde_json::to_value(&default_team_roles()[0].permissions).unwrap();
        assert_eq!(json["sites"]["manage_plugins"], true);
        assert_eq!(json["team"]["edit_settings"], true);

        // partial documents fill in with no rights
        let parsed: RolePermissions = serde_json::from_str(r#"{"sites":{"view":true,"create":false,"edit":false,"delete":false,"share":false,"manage_plugins":false}}"#).unwrap();
        assert!(parsed.sites.view);
        assert!(!parsed.members.invite);
    }
}
