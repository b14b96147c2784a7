//! 血型及输血相容性
//!
//! 供血者的抗原（A / B / Rh）必须是受血者抗原的子集。

use crate::im::error::ImError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    #[serde(rename = "A+")]
    APos,
    #[serde(rename = "A-")]
    ANeg,
    #[serde(rename = "B+")]
    BPos,
    #[serde(rename = "B-")]
    BNeg,
    #[serde(rename = "AB+")]
    AbPos,
    #[serde(rename = "AB-")]
    AbNeg,
    #[serde(rename = "O+")]
    OPos,
    #[serde(rename = "O-")]
    ONeg,
}

const ANTIGEN_A: u8 = 0b001;
const ANTIGEN_B: u8 = 0b010;
const ANTIGEN_RH: u8 = 0b100;

impl BloodType {
    pub const ALL: [BloodType; 8] = [
        BloodType::APos,
        BloodType::ANeg,
        BloodType::BPos,
        BloodType::BNeg,
        BloodType::AbPos,
        BloodType::AbNeg,
        BloodType::OPos,
        BloodType::ONeg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BloodType::APos => "A+",
            BloodType::ANeg => "A-",
            BloodType::BPos => "B+",
            BloodType::BNeg => "B-",
            BloodType::AbPos => "AB+",
            BloodType::AbNeg => "AB-",
            BloodType::OPos => "O+",
            BloodType::ONeg => "O-",
        }
    }

    fn antigens(self) -> u8 {
        match self {
            BloodType::APos => ANTIGEN_A | ANTIGEN_RH,
            BloodType::ANeg => ANTIGEN_A,
            BloodType::BPos => ANTIGEN_B | ANTIGEN_RH,
            BloodType::BNeg => ANTIGEN_B,
            BloodType::AbPos => ANTIGEN_A | ANTIGEN_B | ANTIGEN_RH,
            BloodType::AbNeg => ANTIGEN_A | ANTIGEN_B,
            BloodType::OPos => ANTIGEN_RH,
            BloodType::ONeg => 0,
        }
    }

    /// `self` 作为供血者能否输给 `recipient`
    pub fn can_donate_to(self, recipient: BloodType) -> bool {
        self.antigens() & !recipient.antigens() == 0
    }

    /// `self` 作为受血者能否接受 `donor`
    pub fn can_receive_from(self, donor: BloodType) -> bool {
        donor.can_donate_to(self)
    }

    pub fn donates_to(self) -> Vec<BloodType> {
        Self::ALL
            .into_iter()
            .filter(|r| self.can_donate_to(*r))
            .collect()
    }

    pub fn receives_from(self) -> Vec<BloodType> {
        Self::ALL
            .into_iter()
            .filter(|d| self.can_receive_from(*d))
            .collect()
    }

    /// 界面上的附加说明
    pub fn special_info(self) -> Option<&'static str> {
        match self {
            BloodType::ONeg => Some("Universal Donor - Can donate to all blood types"),
            BloodType::AbPos => Some("Universal Recipient - Can receive from all blood types"),
            BloodType::OPos => Some("Most common blood type"),
            BloodType::AbNeg => Some("Rarest blood type"),
            _ => None,
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodType {
    type Err = ImError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ImError::validation(format!("未知血型: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BloodType::*;

    fn parse_all(list: &[&str]) -> Vec<BloodType> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn matches_reference_table() {
        let table: [(&str, &[&str], &[&str]); 8] = [
            ("A+", &["A+", "AB+"], &["A+", "A-", "O+", "O-"]),
            ("A-", &["A+", "A-", "AB+", "AB-"], &["A-", "O-"]),
            ("B+", &["B+", "AB+"], &["B+", "B-", "O+", "O-"]),
            ("B-", &["B+", "B-", "AB+", "AB-"], &["B-", "O-"]),
            ("AB+", &["AB+"], &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"]),
            ("AB-", &["AB+", "AB-"], &["A-", "B-", "AB-", "O-"]),
            ("O+", &["A+", "B+", "AB+", "O+"], &["O+", "O-"]),
            ("O-", &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"], &["O-"]),
        ];
        for (ty, donate, receive) in table {
            let ty: BloodType = ty.parse().unwrap();
            assert_eq!(ty.donates_to(), parse_all(donate), "{} donates_to", ty);
            assert_eq!(ty.receives_from(), parse_all(receive), "{} receives_from", ty);
        }
    }

    #[test]
    fn o_negative_recipient_only_takes_o_negative() {
        assert_eq!(ONeg.receives_from(), vec![ONeg]);
        assert!(ONeg.can_donate_to(AbPos));
        assert!(!AbPos.can_donate_to(ONeg));
    }

    #[test]
    fn parses_case_insensitively_and_rejects_unknown() {
        assert_eq!("ab+".parse::<BloodType>().unwrap(), AbPos);
        assert_eq!(" o- ".parse::<BloodType>().unwrap(), ONeg);
        assert!("C+".parse::<BloodType>().is_err());
        assert_eq!(serde_json::to_string(&AbNeg).unwrap(), "\"AB-\"");
    }
}
