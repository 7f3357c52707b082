use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 头像允许的最小 / 最大尺寸（像素）
pub const AVATAR_MIN_DIMENSION: u32 = 1;
pub const AVATAR_MAX_DIMENSION: u32 = 128;

/// 头像描述符的固定 type 字面量
pub const AVATAR_KIND_ANIMATION: &str = "Animation";

/// 关键帧动作码，封闭的 12 个取值
///
/// 数字后缀沿用小键盘方位：2=下 4=左 6=右 8=上。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MotionCode {
    #[serde(rename = "move_2")]
    Move2,
    #[serde(rename = "move_4")]
    Move4,
    #[serde(rename = "move_6")]
    Move6,
    #[serde(rename = "move_8")]
    Move8,
    #[serde(rename = "stop_2")]
    Stop2,
    #[serde(rename = "stop_4")]
    Stop4,
    #[serde(rename = "stop_6")]
    Stop6,
    #[serde(rename = "stop_8")]
    Stop8,
    #[serde(rename = "act_2")]
    Act2,
    #[serde(rename = "act_4")]
    Act4,
    #[serde(rename = "act_6")]
    Act6,
    #[serde(rename = "act_8")]
    Act8,
}

impl MotionCode {
    pub const ALL: [MotionCode; 12] = [
        MotionCode::Move2,
        MotionCode::Move4,
        MotionCode::Move6,
        MotionCode::Move8,
        MotionCode::Stop2,
        MotionCode::Stop4,
        MotionCode::Stop6,
        MotionCode::Stop8,
        MotionCode::Act2,
        MotionCode::Act4,
        MotionCode::Act6,
        MotionCode::Act8,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionCode::Move2 => "move_2",
            MotionCode::Move4 => "move_4",
            MotionCode::Move6 => "move_6",
            MotionCode::Move8 => "move_8",
            MotionCode::Stop2 => "stop_2",
            MotionCode::Stop4 => "stop_4",
            MotionCode::Stop6 => "stop_6",
            MotionCode::Stop8 => "stop_8",
            MotionCode::Act2 => "act_2",
            MotionCode::Act4 => "act_4",
            MotionCode::Act6 => "act_6",
            MotionCode::Act8 => "act_8",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_str() == s)
    }
}

/// 单个动作码的关键帧序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frameset {
    /// 是否循环播放
    #[serde(rename = "loop")]
    pub looped: bool,
    /// 帧序列，至少 2 项
    pub frames: Vec<f64>,
}

/// 头像描述符
///
/// 客户端上传完整的元数据包，服务器原样转发给同房间的其他客户端，
/// 这样客户端不用再单独拉取元数据源，服务器也能按域校验尺寸等规则。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarDescriptor {
    /// 固定为 "Animation"
    #[serde(rename = "type")]
    pub kind: String,
    /// 是否自动播放
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoplay: Option<bool>,
    /// 图像源 URL
    pub url: String,
    /// 宽度（1..=128）
    pub width: u32,
    /// 高度（1..=128）
    pub height: u32,
    /// 动作码到关键帧的映射
    pub keyframes: BTreeMap<MotionCode, Frameset>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_code_roundtrip() {
        for code in MotionCode::ALL {
            assert_eq!(MotionCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(MotionCode::parse("fly_9"), None);
    }

    #[test]
    fn test_descriptor_json_shape() {
        let json = serde_json::json!({
            "type": "Animation",
            "url": "http://example.com/npc.png",
            "width": 32,
            "height": 64,
            "keyframes": {
                "move_2": { "loop": true, "frames": [0, 100] }
            }
        });

        let avatar: AvatarDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(avatar.kind, AVATAR_KIND_ANIMATION);
        assert_eq!(avatar.autoplay, None);

        let frameset = &avatar.keyframes[&MotionCode::Move2];
        assert!(frameset.looped);
        assert_eq!(frameset.frames.len(), 2);

        // 序列化后 loop/type 字段名保持线上格式
        let out = serde_json::to_value(&avatar).unwrap();
        assert!(out["keyframes"]["move_2"]["loop"].as_bool().unwrap());
        assert_eq!(out["type"], "Animation");
        assert!(out.get("autoplay").is_none());
    }
}
