use crate::encoding::{
    Annotations, Direction, EdgeKind, Kind, PropertyTag, VertexId, INDEX_PREFIX, SCHEMA_VERSION,
    VERTEX_PREFIX,
};
use crate::error::{Result, SchemaError};

/// Encoded length of a vertex key: version, prefix, kind, big-endian id.
pub const VERTEX_KEY_LEN: usize = 1 + 1 + 1 + 4;

/// Encoded length of an edge key: two vertex keys joined by direction and
/// edge-kind bytes.
pub const EDGE_KEY_LEN: usize = VERTEX_KEY_LEN + 2 + VERTEX_KEY_LEN;

const PROPERTY_KEY_LEN: usize = VERTEX_KEY_LEN + 1;

/// Identity of a type vertex as persisted: its kind and id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeKey {
    pub kind: Kind,
    pub id: VertexId,
}

impl TypeKey {
    pub fn new(kind: Kind, id: VertexId) -> Self {
        Self { kind, id }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(VERTEX_KEY_LEN);
        buf.push(SCHEMA_VERSION);
        buf.push(VERTEX_PREFIX);
        buf.push(self.kind.into_u8());
        buf.extend_from_slice(&self.id.to_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != VERTEX_KEY_LEN {
            return Err(SchemaError::MalformedKey("vertex key length mismatch"));
        }
        check_version(bytes[0])?;
        if bytes[1] != VERTEX_PREFIX {
            return Err(SchemaError::MalformedKey("expected vertex prefix"));
        }
        Ok(Self {
            kind: Kind::from_u8(bytes[2])?,
            id: VertexId::from_bytes(&bytes[3..7])?,
        })
    }

    /// Prefix under which all edge records of one direction of this vertex
    /// sort contiguously, ordered by edge kind then peer id.
    pub fn adjacency_prefix(&self, direction: Direction) -> Vec<u8> {
        let mut buf = self.encode();
        buf.push(direction.into_u8());
        buf
    }

    /// Prefix selecting the edge records of a single kind.
    pub fn edge_prefix(&self, direction: Direction, kind: EdgeKind) -> Vec<u8> {
        let mut buf = self.adjacency_prefix(direction);
        buf.push(kind.into_u8());
        buf
    }

    /// Prefix under which this vertex's scalar properties sort contiguously.
    pub fn property_prefix(&self) -> Vec<u8> {
        self.encode()
    }
}

/// An edge record key. Every edge is written twice, once per endpoint, so
/// `vertex` is the scanning endpoint and `peer` the adjacent vertex.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EdgeKey {
    pub vertex: TypeKey,
    pub direction: Direction,
    pub kind: EdgeKind,
    pub peer: TypeKey,
}

impl EdgeKey {
    pub fn new(vertex: TypeKey, direction: Direction, kind: EdgeKind, peer: TypeKey) -> Self {
        Self {
            vertex,
            direction,
            kind,
            peer,
        }
    }

    /// The same edge as seen from the peer endpoint.
    pub fn mirror(&self) -> Self {
        Self {
            vertex: self.peer,
            direction: self.direction.reversed(),
            kind: self.kind,
            peer: self.vertex,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(EDGE_KEY_LEN);
        buf.extend_from_slice(&self.vertex.encode());
        buf.push(self.direction.into_u8());
        buf.push(self.kind.into_u8());
        buf.extend_from_slice(&self.peer.encode());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != EDGE_KEY_LEN {
            return Err(SchemaError::MalformedKey("edge key length mismatch"));
        }
        let vertex = TypeKey::decode(&bytes[..VERTEX_KEY_LEN])?;
        let direction = Direction::from_u8(bytes[VERTEX_KEY_LEN])?;
        let kind = EdgeKind::from_u8(bytes[VERTEX_KEY_LEN + 1])?;
        let peer = TypeKey::decode(&bytes[VERTEX_KEY_LEN + 2..])?;
        Ok(Self {
            vertex,
            direction,
            kind,
            peer,
        })
    }
}

/// Key of one scalar property of a vertex.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PropertyKey {
    pub vertex: TypeKey,
    pub tag: PropertyTag,
}

impl PropertyKey {
    pub fn new(vertex: TypeKey, tag: PropertyTag) -> Self {
        Self { vertex, tag }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.vertex.encode();
        buf.push(self.tag.into_u8());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PROPERTY_KEY_LEN {
            return Err(SchemaError::MalformedKey("property key length mismatch"));
        }
        Ok(Self {
            vertex: TypeKey::decode(&bytes[..VERTEX_KEY_LEN])?,
            tag: PropertyTag::from_u8(bytes[VERTEX_KEY_LEN])?,
        })
    }
}

/// Label-index key mapping `(kind, label, scope)` to a vertex id. The label is
/// length-prefixed so the encoding stays injective when a scope follows.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct IndexKey {
    pub kind: Kind,
    pub label: String,
    pub scope: Option<String>,
}

impl IndexKey {
    pub fn new(kind: Kind, label: &str, scope: Option<&str>) -> Self {
        Self {
            kind,
            label: label.to_owned(),
            scope: scope.map(str::to_owned),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let label = self.label.as_bytes();
        let scope = self.scope.as_deref().unwrap_or("").as_bytes();
        let mut buf = Vec::with_capacity(5 + label.len() + scope.len());
        buf.push(SCHEMA_VERSION);
        buf.push(INDEX_PREFIX);
        buf.push(self.kind.into_u8());
        buf.extend_from_slice(&(label.len() as u16).to_be_bytes());
        buf.extend_from_slice(label);
        buf.extend_from_slice(scope);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(SchemaError::MalformedKey("index key too short"));
        }
        check_version(bytes[0])?;
        if bytes[1] != INDEX_PREFIX {
            return Err(SchemaError::MalformedKey("expected index prefix"));
        }
        let kind = Kind::from_u8(bytes[2])?;
        let label_len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        if bytes.len() < 5 + label_len {
            return Err(SchemaError::MalformedKey("index key label truncated"));
        }
        let label = std::str::from_utf8(&bytes[5..5 + label_len])
            .map_err(|_| SchemaError::MalformedKey("index key label is not UTF-8"))?
            .to_owned();
        let scope_bytes = &bytes[5 + label_len..];
        let scope = if scope_bytes.is_empty() {
            None
        } else {
            Some(
                std::str::from_utf8(scope_bytes)
                    .map_err(|_| SchemaError::MalformedKey("index key scope is not UTF-8"))?
                    .to_owned(),
            )
        };
        Ok(Self { kind, label, scope })
    }

    /// Prefix selecting every index entry of one vertex kind.
    pub fn kind_prefix(kind: Kind) -> Vec<u8> {
        vec![SCHEMA_VERSION, INDEX_PREFIX, kind.into_u8()]
    }
}

/// Prefix under which every vertex key (and the edge and property keys that
/// extend one) sorts.
pub fn vertex_keyspace_prefix() -> Vec<u8> {
    vec![SCHEMA_VERSION, VERTEX_PREFIX]
}

/// Any well-formed persisted key.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedKey {
    Vertex(TypeKey),
    Edge(EdgeKey),
    Property(PropertyKey),
    Index(IndexKey),
}

/// Decodes an arbitrary persisted key by its prefix and shape.
pub fn decode_key(bytes: &[u8]) -> Result<DecodedKey> {
    if bytes.len() < 2 {
        return Err(SchemaError::MalformedKey("key too short"));
    }
    check_version(bytes[0])?;
    match bytes[1] {
        VERTEX_PREFIX => match bytes.len() {
            VERTEX_KEY_LEN => Ok(DecodedKey::Vertex(TypeKey::decode(bytes)?)),
            PROPERTY_KEY_LEN => Ok(DecodedKey::Property(PropertyKey::decode(bytes)?)),
            EDGE_KEY_LEN => Ok(DecodedKey::Edge(EdgeKey::decode(bytes)?)),
            _ => Err(SchemaError::MalformedKey("unrecognised vertex key shape")),
        },
        INDEX_PREFIX => Ok(DecodedKey::Index(IndexKey::decode(bytes)?)),
        _ => Err(SchemaError::MalformedKey("unknown key prefix")),
    }
}

/// Persisted value of an edge record: the overridden-vertex slot followed by
/// the annotations bitset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EdgeValue {
    pub overridden: Option<TypeKey>,
    pub annotations: Annotations,
}

impl EdgeValue {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(7);
        match self.overridden {
            None => buf.push(0x00),
            Some(key) => {
                buf.push(0x01);
                buf.push(key.kind.into_u8());
                buf.extend_from_slice(&key.id.to_bytes());
            }
        }
        buf.push(self.annotations.into_u8());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(0x00) if bytes.len() == 2 => Ok(Self {
                overridden: None,
                annotations: Annotations::from_u8(bytes[1])?,
            }),
            Some(0x01) if bytes.len() == 7 => Ok(Self {
                overridden: Some(TypeKey::new(
                    Kind::from_u8(bytes[1])?,
                    VertexId::from_bytes(&bytes[2..6])?,
                )),
                annotations: Annotations::from_u8(bytes[6])?,
            }),
            _ => Err(SchemaError::Corruption(
                "edge value has unrecognised shape".into(),
            )),
        }
    }
}

fn check_version(byte: u8) -> Result<()> {
    if byte != SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedSchemaVersion(byte));
    }
    Ok(())
}
