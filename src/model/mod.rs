use serde::{Deserialize, Serialize};

/// Full response envelope returned by the game endpoint. Every mutating call
/// and the dashboard read embed the authoritative snapshot fields; attack
/// calls additionally carry the window/result fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub action: Option<ActionEcho>,
    #[serde(default)]
    pub player: Option<Player>,
    #[serde(default)]
    pub my_team: Option<MyTeam>,
    #[serde(default)]
    pub other_teams: Option<Vec<OtherTeam>>,
    #[serde(default)]
    pub shop_items: Option<Vec<ShopItem>>,
    #[serde(default)]
    pub global: Option<GlobalState>,
    /// Absolute unix-ms end of the currently open attack window, if any.
    #[serde(default)]
    pub attack_window_end: Option<i64>,
    #[serde(default)]
    pub current_target_id: Option<String>,
    #[serde(default)]
    pub stolen: Option<bool>,
    #[serde(default)]
    pub result_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionEcho {
    #[serde(rename = "type")]
    pub kind: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MyTeam {
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub money: i64,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub has_egg: bool,
    #[serde(default)]
    pub gloves: u32,
    #[serde(default)]
    pub shields: u32,
    #[serde(default)]
    pub shield_expiry: Option<String>,
    /// Display string from the backend, same form as `shield_expiry`. The
    /// server enforces the cooldown; the client only shows it.
    #[serde(default)]
    pub glove_cooldown_until: Option<String>,
    #[serde(default)]
    pub is_shield_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtherTeam {
    pub team_id: String,
    #[serde(default)]
    pub team_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShopItem {
    pub item_id: String,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub achievements: Vec<Achievement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    #[serde(default)]
    pub is_unlocked: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// The authoritative state blob the client tracks. Always replaced wholesale
/// from a server response, never patched field-by-field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub player: Player,
    pub my_team: MyTeam,
    #[serde(default)]
    pub other_teams: Vec<OtherTeam>,
    #[serde(default)]
    pub shop_items: Vec<ShopItem>,
    #[serde(default)]
    pub global: Option<GlobalState>,
}

impl Snapshot {
    /// Extracts the snapshot portion of an envelope, if the server included
    /// one. Requires at least the player and team blocks.
    pub fn from_envelope(env: &Envelope) -> Option<Self> {
        let player = env.player.clone()?;
        let my_team = env.my_team.clone()?;
        Some(Self {
            player,
            my_team,
            other_teams: env.other_teams.clone().unwrap_or_default(),
            shop_items: env.shop_items.clone().unwrap_or_default(),
            global: env.global.clone(),
        })
    }
}

/// Outcome of a finalized attack, as observed by either the leader's own
/// finalize response or a participant's status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub result_id: String,
    pub stolen: bool,
    pub message: String,
}

impl ResultRecord {
    pub fn from_envelope(env: &Envelope) -> Option<Self> {
        let result_id = env.result_id.clone()?;
        Some(Self {
            result_id,
            stolen: env.stolen.unwrap_or(false),
            message: env.message.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Member,
}

impl Role {
    /// Role strings from the sheet backend arrive with stray whitespace and
    /// mixed case; anything that is not LEADER is a plain member.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("LEADER") {
            Role::Leader
        } else {
            Role::Member
        }
    }

    pub fn is_leader(self) -> bool {
        matches!(self, Role::Leader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_trims_and_ignores_case() {
        assert_eq!(Role::parse("  leader "), Role::Leader);
        assert_eq!(Role::parse("LEADER"), Role::Leader);
        assert_eq!(Role::parse("member"), Role::Member);
        assert_eq!(Role::parse(""), Role::Member);
    }

    #[test]
    fn snapshot_requires_player_and_team() {
        let mut env = Envelope {
            success: true,
            ..Default::default()
        };
        assert!(Snapshot::from_envelope(&env).is_none());

        env.player = Some(Player {
            id: "1001".into(),
            ..Default::default()
        });
        assert!(Snapshot::from_envelope(&env).is_none());

        env.my_team = Some(MyTeam {
            team_id: "T1".into(),
            money: 250,
            ..Default::default()
        });
        let snap = Snapshot::from_envelope(&env).unwrap();
        assert_eq!(snap.player.id, "1001");
        assert_eq!(snap.my_team.money, 250);
    }

    #[test]
    fn result_record_needs_an_id() {
        let mut env = Envelope {
            success: true,
            stolen: Some(true),
            message: Some("egg taken".into()),
            ..Default::default()
        };
        assert!(ResultRecord::from_envelope(&env).is_none());

        env.result_id = Some("r-7".into());
        let rec = ResultRecord::from_envelope(&env).unwrap();
        assert!(rec.stolen);
        assert_eq!(rec.result_id, "r-7");
        assert_eq!(rec.message, "egg taken");
    }

    #[test]
    fn team_cooldown_fields_arrive_as_strings() {
        let env: Envelope = serde_json::from_str(
            r#"{
                "success": true,
                "my_team": {
                    "team_id": "T1",
                    "money": 100,
                    "shield_expiry": "2025-01-01 13:00",
                    "glove_cooldown_until": "2025-01-01 12:30"
                }
            }"#,
        )
        .unwrap();
        let team = env.my_team.unwrap();
        assert_eq!(team.glove_cooldown_until.as_deref(), Some("2025-01-01 12:30"));
        assert_eq!(team.shield_expiry.as_deref(), Some("2025-01-01 13:00"));
    }

    #[test]
    fn envelope_tolerates_sparse_json() {
        let env: Envelope =
            serde_json::from_str(r#"{"success": false, "message": "bad id"}"#).unwrap();
        assert!(!env.success);
        assert_eq!(env.message.as_deref(), Some("bad id"));
        assert!(env.player.is_none());
        assert!(env.attack_window_end.is_none());
    }
}
