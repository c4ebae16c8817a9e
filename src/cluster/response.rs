use crate::types::VersionedValue;

/// Every outcome a request can resolve to, client-facing or replica hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// 200. Client reads never carry a tombstone; replica hops may.
    Found(VersionedValue),
    /// 404
    NotFound,
    /// 201
    Created,
    /// 202
    Accepted,
    /// 400
    BadRequest(String),
    /// 504
    NotEnoughReplicas,
    /// 500
    InternalError(String),
}

impl Response {
    pub fn status_code(&self) -> u16 {
        match self {
            Response::Found(_) => 200,
            Response::Created => 201,
            Response::Accepted => 202,
            Response::BadRequest(_) => 400,
            Response::NotFound => 404,
            Response::InternalError(_) => 500,
            Response::NotEnoughReplicas => 504,
        }
    }
}

/// Newest version among replica reads. `None` if every replica missed.
pub fn newest<'a, I>(reads: I) -> Option<&'a VersionedValue>
where
    I: IntoIterator<Item = Option<&'a VersionedValue>>,
{
    reads.into_iter().flatten().min()
}

/// Reduce the successful reads of a GET.
///
/// Fewer than `ack` reads is a quorum failure. Otherwise the newest
/// version decides: a tombstone, or no version at all, is `NotFound`.
pub fn merge_get<'a, I>(reads: I, ack: usize) -> Response
where
    I: IntoIterator<Item = Option<&'a VersionedValue>>,
{
    let reads: Vec<Option<&VersionedValue>> = reads.into_iter().collect();
    if reads.len() < ack {
        return Response::NotEnoughReplicas;
    }
    match newest(reads) {
        Some(winner) if !winner.is_tombstone() => Response::Found(winner.clone()),
        _ => Response::NotFound,
    }
}

/// Reduce the replies of a PUT or DELETE: `expected` once `ack` replicas
/// answered with it.
pub fn merge_write<I>(replies: I, ack: usize, expected: Response) -> Response
where
    I: IntoIterator<Item = Response>,
{
    let confirmed = replies.into_iter().filter(|r| *r == expected).count();
    if confirmed >= ack {
        expected
    } else {
        Response::NotEnoughReplicas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(ts: u64, payload: &str) -> VersionedValue {
        VersionedValue::value(ts, payload.as_bytes().to_vec())
    }

    #[test]
    fn newest_value_wins() {
        let (a, b) = (value(1, "a"), value(2, "b"));
        assert_eq!(merge_get([Some(&a), Some(&b)], 2), Response::Found(b.clone()));
    }

    #[test]
    fn newest_tombstone_hides_older_value() {
        let (live, dead) = (value(1, "a"), VersionedValue::tombstone(2));
        assert_eq!(merge_get([Some(&live), Some(&dead)], 1), Response::NotFound);
    }

    #[test]
    fn all_missing_is_not_found() {
        assert_eq!(merge_get([None, None], 2), Response::NotFound);
    }

    #[test]
    fn missing_replica_does_not_hide_value() {
        let a = value(5, "a");
        assert_eq!(merge_get([None, Some(&a)], 2), Response::Found(a.clone()));
    }

    #[test]
    fn too_few_reads_is_quorum_failure() {
        let a = value(1, "a");
        assert_eq!(merge_get([Some(&a)], 2), Response::NotEnoughReplicas);
    }

    #[test]
    fn writes_count_expected_status() {
        let replies = [Response::Created, Response::InternalError("disk".into()), Response::Created];
        assert_eq!(merge_write(replies.clone(), 2, Response::Created), Response::Created);
        assert_eq!(merge_write(replies, 3, Response::Created), Response::NotEnoughReplicas);
        assert_eq!(merge_write([Response::Created], 1, Response::Accepted), Response::NotEnoughReplicas);
    }
}
