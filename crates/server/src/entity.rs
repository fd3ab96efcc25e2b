//! A generic saved entity: an id, a position and whatever NBT it carried.
//!
//! The server has no entity behaviour of its own, so every entity read from
//! disk comes back as a [`StoredEntity`] and is written out unchanged.

use std::sync::{PoisonError, RwLock};

use fastnbt::{IntArray, Value};
use uuid::Uuid;

use keystone_engine::world::block::NbtCompound;
use keystone_engine::world::entity::Entity;
use keystone_engine::world::position::Vec3;

pub struct StoredEntity {
    id: Uuid,
    kind: String,
    position: RwLock<Vec3>,
    data: NbtCompound,
}

impl StoredEntity {
    pub fn new(kind: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            position: RwLock::new(position),
            data: NbtCompound::new(),
        }
    }

    /// Extra tags saved alongside `id`, `UUID` and `Pos`.
    pub fn with_data(mut self, data: NbtCompound) -> Self {
        self.data = data;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn data(&self) -> &NbtCompound {
        &self.data
    }

    pub fn move_to(&self, position: Vec3) {
        *self.position.write().unwrap_or_else(PoisonError::into_inner) = position;
    }

    /// Rebuild an entity from its saved compound. `None` when `id`, `UUID` or
    /// `Pos` is missing or malformed.
    pub fn decode(nbt: &NbtCompound) -> Option<Self> {
        let Some(Value::String(kind)) = nbt.get("id") else {
            return None;
        };
        let id = match nbt.get("UUID") {
            Some(Value::IntArray(ints)) if ints.len() == 4 => uuid_from_ints(ints),
            _ => return None,
        };
        let position = match nbt.get("Pos") {
            Some(Value::List(pos)) => match pos.as_slice() {
                [Value::Double(x), Value::Double(y), Value::Double(z)] => Vec3::new(*x, *y, *z),
                _ => return None,
            },
            _ => return None,
        };
        let mut data = nbt.clone();
        for key in ["id", "UUID", "Pos"] {
            data.remove(key);
        }
        Some(Self {
            id,
            kind: kind.clone(),
            position: RwLock::new(position),
            data,
        })
    }
}

impl Entity for StoredEntity {
    fn uuid(&self) -> Uuid {
        self.id
    }

    fn position(&self) -> Vec3 {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn encode_nbt(&self) -> Option<NbtCompound> {
        let pos = self.position();
        let mut nbt = self.data.clone();
        nbt.insert("id".into(), Value::String(self.kind.clone()));
        nbt.insert("UUID".into(), Value::IntArray(uuid_to_ints(self.id)));
        nbt.insert(
            "Pos".into(),
            Value::List(vec![
                Value::Double(pos.x),
                Value::Double(pos.y),
                Value::Double(pos.z),
            ]),
        );
        Some(nbt)
    }
}

/// Vanilla stores UUIDs as four big-endian ints.
fn uuid_to_ints(id: Uuid) -> IntArray {
    let v = id.as_u128();
    IntArray::new(vec![
        (v >> 96) as i32,
        (v >> 64) as i32,
        (v >> 32) as i32,
        v as i32,
    ])
}

fn uuid_from_ints(ints: &[i32]) -> Uuid {
    let v = ints
        .iter()
        .fold(0u128, |acc, i| (acc << 32) | (*i as u32 as u128));
    Uuid::from_u128(v)
}
