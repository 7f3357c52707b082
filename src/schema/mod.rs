//! 入站消息的结构校验门
//!
//! 每个消息类型对应一份静态注册的结构约束，进程启动后只读。
//! 校验在反序列化成强类型之前进行，一次收集所有违反的约束，
//! 而不是碰到第一条就返回。`typing` 没有 schema，永远视为合法。
//!
//! 嵌套实体（头像描述符、5 元状态向量）是共享定义：
//! 同一个检查函数被引用它的所有消息 schema 调用，
//! 保证头像和状态向量无论出现在哪儿，结构契约都一致。

use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::model::avatar::{AVATAR_KIND_ANIMATION, AVATAR_MAX_DIMENSION, AVATAR_MIN_DIMENSION};
use crate::model::{MessageKind, MotionCode};

/// 房间名 / 显示名的长度上限
const NAME_MAX_LEN: usize = 50;
/// 聊天消息的长度上限
const MESSAGE_MAX_LEN: usize = 500;
/// 关键帧序列的最少帧数
const FRAMES_MIN_LEN: usize = 2;

/// 消息校验器
///
/// `validate` 返回解析后的消息类型供分发表使用；
/// 校验被全局关闭时只做类型名解析，任何载荷都放行。
pub struct MessageValidator {
    enabled: bool,
}

impl MessageValidator {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// 校验一条入站消息
    ///
    /// - `Ok(Some(kind))`：通过，按 kind 分发
    /// - `Ok(None)`：校验已关闭且类型名不认识，调用方静默丢弃
    /// - `Err(UnknownMessageKind)`：类型名没有注册 schema
    /// - `Err(SchemaViolation)`：结构不合法，violations 列出全部问题
    pub fn validate(&self, kind: &str, payload: &Value) -> Result<Option<MessageKind>> {
        let parsed = MessageKind::parse(kind);

        if !self.enabled {
            return Ok(parsed);
        }

        let kind = parsed.ok_or_else(|| RelayError::UnknownMessageKind(kind.to_string()))?;

        let mut violations = Vec::new();
        match kind {
            MessageKind::Auth => check_auth(payload, &mut violations),
            MessageKind::Join => check_join(payload, &mut violations),
            MessageKind::Name => check_name(payload, &mut violations),
            // typing 没有 schema，隐式合法
            MessageKind::Typing => {}
            MessageKind::Say => check_say(payload, &mut violations),
            MessageKind::Move => check_move(payload, &mut violations),
            MessageKind::Avatar => check_avatar(payload, &mut violations),
        }

        if violations.is_empty() {
            Ok(Some(kind))
        } else {
            Err(RelayError::SchemaViolation {
                kind: kind.to_string(),
                violations,
            })
        }
    }
}

/// JSON 值的类型名，用于面向开发者的诊断信息
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------- 各消息类型的 schema ----------

fn check_auth(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        out.push(format!("payload: expected object, got {}", type_name(payload)));
        return;
    };

    match obj.get("token") {
        None => out.push("token: required field is missing".to_string()),
        Some(token) => check_string_type("token", token, out),
    }

    // room / name / state / avatar 都是可选项，出现时才检查类型
    if let Some(room) = obj.get("room") {
        check_bounded_string("room", room, 1, NAME_MAX_LEN, out);
    }
    if let Some(name) = obj.get("name") {
        check_bounded_string("name", name, 1, NAME_MAX_LEN, out);
    }
    if let Some(state) = obj.get("state") {
        check_state("state", state, out);
    }
    if let Some(avatar) = obj.get("avatar") {
        check_avatar_descriptor("avatar", avatar, out);
    }
}

fn check_join(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        out.push(format!("payload: expected object, got {}", type_name(payload)));
        return;
    };

    match obj.get("room") {
        None => out.push("room: required field is missing".to_string()),
        Some(room) => check_bounded_string("room", room, 1, NAME_MAX_LEN, out),
    }
}

fn check_name(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        out.push(format!("payload: expected object, got {}", type_name(payload)));
        return;
    };

    match obj.get("name") {
        None => out.push("name: required field is missing".to_string()),
        Some(name) => check_bounded_string("name", name, 1, NAME_MAX_LEN, out),
    }
}

fn check_say(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        out.push(format!("payload: expected object, got {}", type_name(payload)));
        return;
    };

    match obj.get("message") {
        None => out.push("message: required field is missing".to_string()),
        Some(message) => check_bounded_string("message", message, 1, MESSAGE_MAX_LEN, out),
    }
}

fn check_move(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        out.push(format!("payload: expected object, got {}", type_name(payload)));
        return;
    };

    // buffer 是不透明的重放 token，原样转发，这里不做任何检查
    match obj.get("state") {
        None => out.push("state: required field is missing".to_string()),
        Some(state) => check_state("state", state, out),
    }
}

fn check_avatar(payload: &Value, out: &mut Vec<String>) {
    let Some(obj) = payload.as_object() else {
        out.push(format!("payload: expected object, got {}", type_name(payload)));
        return;
    };

    match obj.get("metadata") {
        None => out.push("metadata: required field is missing".to_string()),
        Some(metadata) => check_avatar_descriptor("metadata", metadata, out),
    }
}

// ---------- 共享实体定义 ----------

/// 5 元状态向量 `[x, y, z, direction, action]`
fn check_state(path: &str, value: &Value, out: &mut Vec<String>) {
    let Some(entries) = value.as_array() else {
        out.push(format!("{}: expected array, got {}", path, type_name(value)));
        return;
    };

    if entries.len() != 5 {
        out.push(format!(
            "{}: expected exactly 5 entries, got {}",
            path,
            entries.len()
        ));
    }

    for (i, entry) in entries.iter().enumerate() {
        if !entry.is_number() {
            out.push(format!(
                "{}[{}]: expected number, got {}",
                path,
                i,
                type_name(entry)
            ));
        }
    }
}

/// 头像描述符
fn check_avatar_descriptor(path: &str, value: &Value, out: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        out.push(format!("{}: expected object, got {}", path, type_name(value)));
        return;
    };

    match obj.get("type") {
        None => out.push(format!("{}.type: required field is missing", path)),
        Some(kind) => match kind.as_str() {
            Some(AVATAR_KIND_ANIMATION) => {}
            Some(other) => out.push(format!(
                "{}.type: expected \"{}\", got \"{}\"",
                path, AVATAR_KIND_ANIMATION, other
            )),
            None => out.push(format!(
                "{}.type: expected string, got {}",
                path,
                type_name(kind)
            )),
        },
    }

    if let Some(autoplay) = obj.get("autoplay") {
        if !autoplay.is_boolean() {
            out.push(format!(
                "{}.autoplay: expected boolean, got {}",
                path,
                type_name(autoplay)
            ));
        }
    }

    match obj.get("url") {
        None => out.push(format!("{}.url: required field is missing", path)),
        Some(url) => check_string_type(&format!("{}.url", path), url, out),
    }

    for field in ["width", "height"] {
        match obj.get(field) {
            None => out.push(format!("{}.{}: required field is missing", path, field)),
            Some(dim) => check_dimension(&format!("{}.{}", path, field), dim, out),
        }
    }

    match obj.get("keyframes") {
        None => out.push(format!("{}.keyframes: required field is missing", path)),
        Some(keyframes) => check_keyframes(&format!("{}.keyframes", path), keyframes, out),
    }
}

fn check_keyframes(path: &str, value: &Value, out: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        out.push(format!("{}: expected object, got {}", path, type_name(value)));
        return;
    };

    for (key, frameset) in obj {
        if MotionCode::parse(key).is_none() {
            out.push(format!("{}.{}: unknown motion code", path, key));
            continue;
        }
        check_frameset(&format!("{}.{}", path, key), frameset, out);
    }
}

fn check_frameset(path: &str, value: &Value, out: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        out.push(format!("{}: expected object, got {}", path, type_name(value)));
        return;
    };

    match obj.get("loop") {
        None => out.push(format!("{}.loop: required field is missing", path)),
        Some(looped) => {
            if !looped.is_boolean() {
                out.push(format!(
                    "{}.loop: expected boolean, got {}",
                    path,
                    type_name(looped)
                ));
            }
        }
    }

    match obj.get("frames") {
        None => out.push(format!("{}.frames: required field is missing", path)),
        Some(frames) => match frames.as_array() {
            None => out.push(format!(
                "{}.frames: expected array, got {}",
                path,
                type_name(frames)
            )),
            Some(entries) => {
                if entries.len() < FRAMES_MIN_LEN {
                    out.push(format!(
                        "{}.frames: expected at least {} entries, got {}",
                        path,
                        FRAMES_MIN_LEN,
                        entries.len()
                    ));
                }
                for (i, entry) in entries.iter().enumerate() {
                    if !entry.is_number() {
                        out.push(format!(
                            "{}.frames[{}]: expected number, got {}",
                            path,
                            i,
                            type_name(entry)
                        ));
                    }
                }
            }
        },
    }
}

// ---------- 基础检查 ----------

fn check_string_type(field: &str, value: &Value, out: &mut Vec<String>) {
    if !value.is_string() {
        out.push(format!(
            "{}: expected string, got {}",
            field,
            type_name(value)
        ));
    }
}

fn check_bounded_string(field: &str, value: &Value, min: usize, max: usize, out: &mut Vec<String>) {
    match value.as_str() {
        None => out.push(format!(
            "{}: expected string, got {}",
            field,
            type_name(value)
        )),
        Some(s) => {
            let len = s.chars().count();
            if len < min || len > max {
                out.push(format!(
                    "{}: length must be between {} and {}, got {}",
                    field, min, max, len
                ));
            }
        }
    }
}

fn check_dimension(field: &str, value: &Value, out: &mut Vec<String>) {
    match value.as_u64() {
        Some(dim) if (AVATAR_MIN_DIMENSION as u64..=AVATAR_MAX_DIMENSION as u64).contains(&dim) => {
        }
        Some(dim) => out.push(format!(
            "{}: must be between {} and {}, got {}",
            field, AVATAR_MIN_DIMENSION, AVATAR_MAX_DIMENSION, dim
        )),
        None => out.push(format!(
            "{}: expected integer, got {}",
            field,
            type_name(value)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> MessageValidator {
        MessageValidator::new(true)
    }

    fn sample_avatar() -> Value {
        json!({
            "type": "Animation",
            "url": "http://example.com/sprite.png",
            "width": 32,
            "height": 64,
            "keyframes": {
                "move_2": { "loop": true, "frames": [0, 100, 200] },
                "stop_2": { "loop": false, "frames": [0, 0] }
            }
        })
    }

    #[test]
    fn test_say_rejects_non_string_message() {
        let err = validator()
            .validate("say", &json!({ "message": 123 }))
            .unwrap_err();

        match err {
            RelayError::SchemaViolation { kind, violations } => {
                assert_eq!(kind, "say");
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("message"));
                assert!(violations[0].contains("number"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_say_accepts_string_message() {
        let kind = validator()
            .validate("say", &json!({ "message": "hi" }))
            .unwrap();
        assert_eq!(kind, Some(MessageKind::Say));
    }

    #[test]
    fn test_unknown_kind() {
        // 类型名打错时报 UnknownMessageKind，与结构不合法是两种错误
        let err = validator()
            .validate("sya", &json!({ "message": "hi" }))
            .unwrap_err();
        assert_eq!(err, RelayError::UnknownMessageKind("sya".to_string()));
    }

    #[test]
    fn test_disabled_passes_everything() {
        let validator = MessageValidator::new(false);
        assert_eq!(
            validator.validate("say", &json!({ "message": 123 })).unwrap(),
            Some(MessageKind::Say)
        );
        // 校验关闭时不认识的类型名静默丢弃
        assert_eq!(validator.validate("sya", &json!({})).unwrap(), None);
    }

    #[test]
    fn test_typing_has_no_schema() {
        assert_eq!(
            validator().validate("typing", &json!(42)).unwrap(),
            Some(MessageKind::Typing)
        );
    }

    #[test]
    fn test_violations_are_collected_not_first_only() {
        let err = validator()
            .validate(
                "auth",
                &json!({ "room": 7, "name": "", "state": [1, 2, 3] }),
            )
            .unwrap_err();

        match err {
            RelayError::SchemaViolation { violations, .. } => {
                // token 缺失 + room 类型 + name 长度 + state 长度，全部列出
                assert!(violations.iter().any(|v| v.starts_with("token")));
                assert!(violations.iter().any(|v| v.starts_with("room")));
                assert!(violations.iter().any(|v| v.starts_with("name")));
                assert!(violations.iter().any(|v| v.starts_with("state")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_move_buffer_is_opaque() {
        // buffer 可以是任何东西，甚至缺失
        let payload = json!({ "buffer": { "weird": [1, 2] }, "state": [0, 0, 0, 0, 0] });
        assert!(validator().validate("move", &payload).is_ok());

        let payload = json!({ "state": [0, 0, 0, 0, 0] });
        assert!(validator().validate("move", &payload).is_ok());
    }

    #[test]
    fn test_avatar_descriptor_shared_definition() {
        // 同一份头像定义同时约束 auth.avatar 和 avatar.metadata
        let ok_auth = json!({ "token": "hi", "avatar": sample_avatar() });
        assert!(validator().validate("auth", &ok_auth).is_ok());

        let ok_avatar = json!({ "metadata": sample_avatar() });
        assert!(validator().validate("avatar", &ok_avatar).is_ok());

        let mut bad = sample_avatar();
        bad["width"] = json!(500);
        bad["keyframes"]["fly_9"] = json!({ "loop": true, "frames": [0, 1] });

        let err = validator()
            .validate("avatar", &json!({ "metadata": bad }))
            .unwrap_err();
        match err {
            RelayError::SchemaViolation { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("width")));
                assert!(violations.iter().any(|v| v.contains("fly_9")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_frameset_constraints() {
        let mut avatar = sample_avatar();
        avatar["keyframes"]["move_2"] = json!({ "loop": "yes", "frames": [0] });

        let err = validator()
            .validate("avatar", &json!({ "metadata": avatar }))
            .unwrap_err();
        match err {
            RelayError::SchemaViolation { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("loop")));
                assert!(violations.iter().any(|v| v.contains("frames")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_join_room_length() {
        let long_room = "r".repeat(51);
        let err = validator()
            .validate("join", &json!({ "room": long_room }))
            .unwrap_err();
        match err {
            RelayError::SchemaViolation { violations, .. } => {
                assert!(violations[0].contains("room"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(validator().validate("join", &json!({ "room": "lobby" })).is_ok());
    }
}
