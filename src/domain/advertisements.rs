//! Advertisement domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::accounts::UserType;
use super::percentage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    Banner,
    Slider,
    Popup,
    Sponsored,
}

string_enum!(AdType);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdPosition {
    HomeSlider,
    HomeBanner,
    SearchResults,
    ProjectDetails,
    ProfilePage,
}

string_enum!(AdPosition);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetAudience {
    All,
    Contractors,
    Clients,
}

string_enum!(TargetAudience);

/// Audiences whose ads a caller may see. Anonymous callers only see `all`.
pub fn visible_audiences(caller: Option<UserType>) -> Vec<String> {
    let mut audiences = vec![TargetAudience::All.to_string()];
    match caller {
        Some(UserType::Contractor) => audiences.push(TargetAudience::Contractors.to_string()),
        Some(UserType::Client) => audiences.push(TargetAudience::Clients.to_string()),
        None => {}
    }
    audiences
}

#[derive(Debug, Clone, FromRow)]
pub struct Advertisement {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub image: String,
    pub link_url: Option<String>,
    pub button_text: String,
    pub ad_type: String,
    pub position: String,
    pub target_audience: String,
    pub background_color: String,
    pub text_color: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub priority: i32,
    pub is_active: bool,
    pub impressions: i32,
    pub clicks: i32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Advertisement {
    pub fn click_through_rate(&self) -> f64 {
        percentage(self.clicks as i64, self.impressions as i64)
    }

    pub fn is_currently_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && now <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvertisementResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub image: String,
    pub link_url: Option<String>,
    pub button_text: String,
    pub ad_type: String,
    pub position: String,
    pub target_audience: String,
    pub background_color: String,
    pub text_color: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub priority: i32,
    pub impressions: i32,
    pub clicks: i32,
    pub click_through_rate: f64,
    pub is_currently_active: bool,
}

impl From<Advertisement> for AdvertisementResponse {
    fn from(ad: Advertisement) -> Self {
        let click_through_rate = ad.click_through_rate();
        let is_currently_active = ad.is_currently_active(Utc::now());
        Self {
            id: ad.id,
            title: ad.title,
            description: ad.description,
            image: ad.image,
            link_url: ad.link_url,
            button_text: ad.button_text,
            ad_type: ad.ad_type,
            position: ad.position,
            target_audience: ad.target_audience,
            background_color: ad.background_color,
            text_color: ad.text_color,
            start_date: ad.start_date,
            end_date: ad.end_date,
            priority: ad.priority,
            impressions: ad.impressions,
            clicks: ad.clicks,
            click_through_rate,
            is_currently_active,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdvertisementQuery {
    #[serde(default)]
    pub position: Option<AdPosition>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdCategory {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ad(impressions: i32, clicks: i32) -> Advertisement {
        let now = Utc::now();
        Advertisement {
            id: Uuid::new_v4(),
            title: "Spring sale".into(),
            description: String::new(),
            image: "advertisements/spring.png".into(),
            link_url: None,
            button_text: "Learn More".into(),
            ad_type: "banner".into(),
            position: "home_banner".into(),
            target_audience: "all".into(),
            background_color: "#f97316".into(),
            text_color: "#ffffff".into(),
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(1),
            priority: 5,
            is_active: true,
            impressions,
            clicks,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn ctr_is_zero_without_impressions() {
        assert_eq!(ad(0, 0).click_through_rate(), 0.0);
        assert_eq!(ad(200, 5).click_through_rate(), 2.5);
    }

    #[test]
    fn active_window() {
        let now = Utc::now();
        let mut a = ad(0, 0);
        assert!(a.is_currently_active(now));
        a.end_date = now - Duration::hours(1);
        assert!(!a.is_currently_active(now));
        let mut b = ad(0, 0);
        b.is_active = false;
        assert!(!b.is_currently_active(now));
    }

    #[test]
    fn audience_depends_on_caller() {
        assert_eq!(visible_audiences(None), vec!["all"]);
        assert_eq!(
            visible_audiences(Some(UserType::Contractor)),
            vec!["all", "contractors"]
        );
        assert_eq!(visible_audiences(Some(UserType::Client)), vec!["all", "clients"]);
    }
}
