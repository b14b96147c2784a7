//! 血液请求通知匹配
//!
//! 对每个候选献血者按固定优先级判定：紧急请求无条件通知；
//! 否则先看免打扰，再看血型匹配，最后看同城。

use crate::im::notification::models::{BloodRequest, NotificationSettings};
use crate::im::profile::models::Profile;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 触发通知的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyReason {
    Emergency,
    BloodType,
    Nearby,
}

impl NotifyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyReason::Emergency => "emergency",
            NotifyReason::BloodType => "blood_type",
            NotifyReason::Nearby => "nearby",
        }
    }
}

/// 候选献血者：资料 + 通知偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonorCandidate {
    pub profile: Profile,
    #[serde(default)]
    pub settings: NotificationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub donor_id: String,
    pub reason: NotifyReason,
}

/// 推送内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub request_id: String,
    pub title: String,
    pub body: String,
    pub reason: NotifyReason,
    pub is_emergency: bool,
}

/// 城市粗匹配：请求地点包含献血者城市（忽略大小写），空城市不匹配
pub fn city_matches(donor_city: &str, request_location: &str) -> bool {
    let city = donor_city.trim().to_lowercase();
    !city.is_empty() && request_location.to_lowercase().contains(&city)
}

/// 判定单个候选人；`None` 表示不通知
pub fn evaluate(
    request: &BloodRequest,
    candidate: &DonorCandidate,
    now: NaiveTime,
) -> Option<NotifyReason> {
    if request.is_emergency {
        return Some(NotifyReason::Emergency);
    }

    let settings = &candidate.settings;
    if settings.quiet_hours.is_quiet_at(now) {
        return None;
    }

    let compatible = candidate
        .profile
        .blood_type
        .is_some_and(|donor| donor.can_donate_to(request.blood_type));
    if settings.matching_blood_type && compatible {
        return Some(NotifyReason::BloodType);
    }

    if settings.nearby_requests && city_matches(&candidate.profile.city, &request.location) {
        return Some(NotifyReason::Nearby);
    }
    None
}

/// 计算需要通知的献血者，保持候选人的输入顺序；发起人本人不通知
pub fn match_request(
    request: &BloodRequest,
    candidates: &[DonorCandidate],
    now: NaiveTime,
) -> Vec<NotificationTarget> {
    let targets: Vec<NotificationTarget> = candidates
        .iter()
        .filter(|c| c.profile.id != request.requester_id)
        .filter_map(|c| {
            evaluate(request, c, now).map(|reason| NotificationTarget {
                donor_id: c.profile.id.clone(),
                reason,
            })
        })
        .collect();
    debug!(
        "[Matcher] 请求 {} ({}) 候选 {} 人，命中 {} 人",
        request.id,
        request.blood_type,
        candidates.len(),
        targets.len()
    );
    targets
}

pub fn build_payload(request: &BloodRequest, reason: NotifyReason) -> AlertPayload {
    let (title, body) = match reason {
        NotifyReason::Emergency => (
            format!("🚨 Emergency: {} needed", request.blood_type),
            format!("{} blood urgently needed at {}", request.blood_type, request.location),
        ),
        NotifyReason::BloodType => (
            format!("{} blood request", request.blood_type),
            format!("Your blood type can help a patient at {}", request.location),
        ),
        NotifyReason::Nearby => (
            "Blood request near you".to_string(),
            format!("{} blood needed at {}", request.blood_type, request.location),
        ),
    };
    AlertPayload {
        request_id: request.id.clone(),
        title,
        body,
        reason,
        is_emergency: request.is_emergency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::notification::compatibility::BloodType;
    use crate::im::notification::models::{QuietHours, RequestStatus, Urgency};
    use crate::im::profile::models::donor;

    fn request(blood_type: BloodType, location: &str, is_emergency: bool) -> BloodRequest {
        BloodRequest {
            id: "req-1".to_string(),
            requester_id: "recipient".to_string(),
            blood_type,
            location: location.to_string(),
            message: "need blood".to_string(),
            urgency: if is_emergency { Urgency::Critical } else { Urgency::High },
            is_emergency,
            status: RequestStatus::Active,
            created_at: 0,
        }
    }

    fn candidate(id: &str, blood_type: Option<BloodType>, city: &str, settings: NotificationSettings) -> DonorCandidate {
        DonorCandidate {
            profile: donor(id, blood_type, city),
            settings,
        }
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn emergency_overrides_toggles_and_quiet_hours() {
        let mut settings = NotificationSettings::default();
        settings.emergency_requests = false;
        settings.quiet_hours = QuietHours::new(true, "22:00", "08:00");
        let c = candidate("d1", None, "", settings);

        let req = request(BloodType::AbPos, "Nowhere", true);
        assert_eq!(evaluate(&req, &c, at(23, 30)), Some(NotifyReason::Emergency));
    }

    #[test]
    fn blood_type_match_follows_donor_compatibility() {
        let settings = NotificationSettings::app_defaults();
        let o_neg = candidate("o", Some(BloodType::ONeg), "Elsewhere", settings.clone());
        let a_pos = candidate("a", Some(BloodType::APos), "Elsewhere", settings.clone());
        let unknown = candidate("u", None, "Elsewhere", settings);

        let ab_request = request(BloodType::AbPos, "City Hospital", false);
        assert_eq!(evaluate(&ab_request, &o_neg, at(12, 0)), Some(NotifyReason::BloodType));
        assert_eq!(evaluate(&ab_request, &a_pos, at(12, 0)), Some(NotifyReason::BloodType));
        assert_eq!(evaluate(&ab_request, &unknown, at(12, 0)), None);

        let o_request = request(BloodType::ONeg, "City Hospital", false);
        let targets = match_request(&o_request, &[o_neg, a_pos], at(12, 0));
        assert_eq!(
            targets,
            vec![NotificationTarget {
                donor_id: "o".to_string(),
                reason: NotifyReason::BloodType
            }]
        );
    }

    #[test]
    fn nearby_applies_when_blood_type_does_not() {
        let mut settings = NotificationSettings::default();
        settings.nearby_requests = true;
        let c = candidate("d", Some(BloodType::APos), "springfield", settings);

        let req = request(BloodType::ONeg, "Springfield General Hospital", false);
        assert_eq!(evaluate(&req, &c, at(9, 0)), Some(NotifyReason::Nearby));
        assert!(!city_matches("  ", "anything"));
    }

    #[test]
    fn quiet_hours_suppress_non_emergency() {
        let mut settings = NotificationSettings::app_defaults();
        settings.quiet_hours = QuietHours::new(true, "22:00", "08:00");
        let c = candidate("d", Some(BloodType::ONeg), "Springfield", settings);
        let req = request(BloodType::APos, "Springfield", false);

        assert_eq!(evaluate(&req, &c, at(23, 30)), None);
        assert_eq!(evaluate(&req, &c, at(5, 0)), None);
        assert_eq!(evaluate(&req, &c, at(12, 0)), Some(NotifyReason::BloodType));
    }

    #[test]
    fn disabled_categories_fail_safe() {
        let c = candidate("d", Some(BloodType::ONeg), "Springfield", NotificationSettings::default());
        let req = request(BloodType::APos, "Springfield", false);
        assert_eq!(evaluate(&req, &c, at(12, 0)), None);
    }

    #[test]
    fn requester_is_never_targeted() {
        let c = candidate("recipient", Some(BloodType::ONeg), "X", NotificationSettings::app_defaults());
        let req = request(BloodType::ONeg, "X", true);
        assert!(match_request(&req, &[c], at(12, 0)).is_empty());
    }

    #[test]
    fn payload_marks_emergency() {
        let req = request(BloodType::ONeg, "City Hospital", true);
        let payload = build_payload(&req, NotifyReason::Emergency);
        assert!(payload.is_emergency);
        assert_eq!(payload.request_id, "req-1");
        assert!(payload.body.contains("City Hospital"));
        assert_eq!(serde_json::to_value(payload.reason).unwrap(), "emergency");
    }
}
