use serde::{Deserialize, Serialize};

/// 实体状态向量
///
/// 固定 5 个数值：`[x, y, z, direction, action]`。
/// 线上格式是恰好 5 个数字的 JSON 数组，多一个少一个都无法反序列化。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityState([f64; 5]);

impl EntityState {
    pub fn new(values: [f64; 5]) -> Self {
        Self(values)
    }

    pub fn x(&self) -> f64 {
        self.0[0]
    }

    pub fn y(&self) -> f64 {
        self.0[1]
    }

    pub fn z(&self) -> f64 {
        self.0[2]
    }

    pub fn direction(&self) -> f64 {
        self.0[3]
    }

    pub fn action(&self) -> f64 {
        self.0[4]
    }

    pub fn as_array(&self) -> [f64; 5] {
        self.0
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self([0.0; 5])
    }
}

impl From<[f64; 5]> for EntityState {
    fn from(values: [f64; 5]) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let state = EntityState::new([1.0, 2.0, 3.0, 4.0, 1.0]);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0,1.0]");

        let back: EntityState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_wrong_arity_rejected() {
        // 4 个或 6 个数字都不是合法的状态向量
        assert!(serde_json::from_str::<EntityState>("[1,2,3,4]").is_err());
        assert!(serde_json::from_str::<EntityState>("[1,2,3,4,5,6]").is_err());
    }

    #[test]
    fn test_default_is_zeroed() {
        let state = EntityState::default();
        assert_eq!(state.as_array(), [0.0; 5]);
        assert_eq!(state.direction(), 0.0);
    }
}
