//! QoS classes for cellular data bearers
//!
//! The nine standardized QoS class identifiers with their resource type,
//! scheduling priority and packet delay budget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosClass {
    GbrConvVoice,
    GbrConvVideo,
    GbrGaming,
    GbrNonConvVideo,
    NgbrIms,
    NgbrVideoTcpOperator,
    NgbrVoiceVideoGaming,
    NgbrVideoTcpPremium,
    NgbrVideoTcpDefault,
}

impl QosClass {
    pub const ALL: [QosClass; 9] = [
        QosClass::GbrConvVoice,
        QosClass::GbrConvVideo,
        QosClass::GbrGaming,
        QosClass::GbrNonConvVideo,
        QosClass::NgbrIms,
        QosClass::NgbrVideoTcpOperator,
        QosClass::NgbrVoiceVideoGaming,
        QosClass::NgbrVideoTcpPremium,
        QosClass::NgbrVideoTcpDefault,
    ];

    /// QoS class identifier (1..=9)
    pub fn qci(self) -> u8 {
        match self {
            QosClass::GbrConvVoice => 1,
            QosClass::GbrConvVideo => 2,
            QosClass::GbrGaming => 3,
            QosClass::GbrNonConvVideo => 4,
            QosClass::NgbrIms => 5,
            QosClass::NgbrVideoTcpOperator => 6,
            QosClass::NgbrVoiceVideoGaming => 7,
            QosClass::NgbrVideoTcpPremium => 8,
            QosClass::NgbrVideoTcpDefault => 9,
        }
    }

    /// Guaranteed bit rate resource type
    pub fn is_gbr(self) -> bool {
        self.qci() <= 4
    }

    /// Scheduling priority, lower is served first
    pub fn priority(self) -> u8 {
        match self {
            QosClass::GbrConvVoice => 2,
            QosClass::GbrConvVideo => 4,
            QosClass::GbrGaming => 3,
            QosClass::GbrNonConvVideo => 5,
            QosClass::NgbrIms => 1,
            QosClass::NgbrVideoTcpOperator => 6,
            QosClass::NgbrVoiceVideoGaming => 7,
            QosClass::NgbrVideoTcpPremium => 8,
            QosClass::NgbrVideoTcpDefault => 9,
        }
    }

    /// Packet delay budget in milliseconds
    pub fn delay_budget_ms(self) -> u32 {
        match self {
            QosClass::GbrConvVoice => 100,
            QosClass::GbrConvVideo => 150,
            QosClass::GbrGaming => 50,
            QosClass::GbrNonConvVideo => 300,
            QosClass::NgbrIms => 100,
            QosClass::NgbrVideoTcpOperator => 300,
            QosClass::NgbrVoiceVideoGaming => 100,
            QosClass::NgbrVideoTcpPremium => 300,
            QosClass::NgbrVideoTcpDefault => 300,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            QosClass::GbrConvVoice => "gbr_conv_voice",
            QosClass::GbrConvVideo => "gbr_conv_video",
            QosClass::GbrGaming => "gbr_gaming",
            QosClass::GbrNonConvVideo => "gbr_non_conv_video",
            QosClass::NgbrIms => "ngbr_ims",
            QosClass::NgbrVideoTcpOperator => "ngbr_video_tcp_operator",
            QosClass::NgbrVoiceVideoGaming => "ngbr_voice_video_gaming",
            QosClass::NgbrVideoTcpPremium => "ngbr_video_tcp_premium",
            QosClass::NgbrVideoTcpDefault => "ngbr_video_tcp_default",
        }
    }
}

impl Default for QosClass {
    fn default() -> Self {
        QosClass::NgbrVideoTcpDefault
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QosClass {
    type Err = String;

    /// Accepts the snake_case name or the numeric QCI
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(qci) = s.parse::<u8>() {
            return QosClass::ALL
                .iter()
                .copied()
                .find(|c| c.qci() == qci)
                .ok_or_else(|| format!("unknown QCI {}", qci));
        }
        QosClass::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown QoS class '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qci_numbering() {
        for (i, class) in QosClass::ALL.iter().enumerate() {
            assert_eq!(class.qci() as usize, i + 1);
        }
        assert!(QosClass::GbrGaming.is_gbr());
        assert!(!QosClass::NgbrIms.is_gbr());
    }

    #[test]
    fn test_parse() {
        assert_eq!("9".parse::<QosClass>(), Ok(QosClass::NgbrVideoTcpDefault));
        assert_eq!("gbr_conv_voice".parse::<QosClass>(), Ok(QosClass::GbrConvVoice));
        assert!("12".parse::<QosClass>().is_err());
        assert!("best_effort".parse::<QosClass>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let class = QosClass::NgbrVoiceVideoGaming;
        assert_eq!(class.to_string().parse::<QosClass>(), Ok(class));
    }

    #[test]
    fn test_serde_name() {
        let json = serde_json::to_string(&QosClass::NgbrIms).unwrap();
        assert_eq!(json, "\"ngbr_ims\"");
    }
}
