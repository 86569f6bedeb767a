//! Cursor-paginated listings as lazy streams
//!
//! [`paginate`] turns any "fetch a page, maybe get a continuation value back"
//! API into a [`Stream`] of items. The next page is only requested once the
//! consumer has drained the current one.

use std::future::Future;

use futures::stream::{self, Stream, StreamExt};

use crate::error::Result;
use crate::retry::{Backoff, is_retryable_error, retry_with_backoff};
use crate::traits::{ListPage, ObjectInfo, ObjectStore};

/// Request parameter carrying the continuation token of an object listing
pub const CONTINUATION_PARAM: &str = "continuation-token";

/// A continuation value and the request parameter it goes back through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub param: String,
    pub value: String,
}

enum Next {
    First,
    After(Cursor),
    Done,
}

struct Pager<F, C, X> {
    fetch: F,
    extract_cursor: C,
    extract_items: X,
    param: String,
    next: Next,
}

/// Stream every item of a cursor-paginated API
///
/// `fetch(None)` requests the first page. While `extract_cursor` finds a
/// non-empty continuation value on the latest page, the following page is
/// requested with it. A failed fetch is yielded once and ends the stream.
pub fn paginate<P, T, I, F, Fut, C, X>(
    fetch: F,
    cursor_param: impl Into<String>,
    extract_cursor: C,
    extract_items: X,
) -> impl Stream<Item = Result<T>>
where
    F: FnMut(Option<Cursor>) -> Fut,
    Fut: Future<Output = Result<P>>,
    C: Fn(&P) -> Option<String>,
    X: Fn(P) -> I,
    I: IntoIterator<Item = T>,
{
    let pager = Pager {
        fetch,
        extract_cursor,
        extract_items,
        param: cursor_param.into(),
        next: Next::First,
    };

    stream::unfold(pager, |mut pager| async move {
        let cursor = match std::mem::replace(&mut pager.next, Next::Done) {
            Next::Done => return None,
            Next::First => None,
            Next::After(cursor) => Some(cursor),
        };

        match (pager.fetch)(cursor).await {
            Ok(page) => {
                if let Some(value) = (pager.extract_cursor)(&page).filter(|v| !v.is_empty()) {
                    pager.next = Next::After(Cursor {
                        param: pager.param.clone(),
                        value,
                    });
                }
                let items: Vec<Result<T>> =
                    (pager.extract_items)(page).into_iter().map(Ok).collect();
                Some((items, pager))
            }
            Err(e) => Some((vec![Err(e)], pager)),
        }
    })
    .flat_map(stream::iter)
}

/// Stream every object under `prefix`, retrying each page per `backoff`
pub fn list_objects<'a, B>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: Option<&'a str>,
    backoff: &'a B,
) -> impl Stream<Item = Result<ObjectInfo>> + 'a
where
    B: Backoff + Sync + ?Sized,
{
    paginate(
        move |cursor: Option<Cursor>| {
            let prefix = prefix.map(str::to_string);
            let token = cursor.map(|c| c.value);
            async move {
                retry_with_backoff(
                    backoff,
                    || store.list_page(bucket, prefix.clone(), token.clone()),
                    is_retryable_error,
                )
                .await
            }
        },
        CONTINUATION_PARAM,
        |page: &ListPage| page.next_cursor.clone(),
        |page: ListPage| page.objects,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::retry::StepBackoff;
    use crate::traits::MockObjectStore;
    use futures::TryStreamExt;
    use std::sync::{Arc, Mutex};

    type Page = (Vec<u32>, Option<&'static str>);

    fn pages() -> Vec<Page> {
        vec![(vec![1, 2], Some("a")), (vec![3, 4], Some("b")), (vec![5], None)]
    }

    #[tokio::test]
    async fn test_paginate_follows_cursors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        let items: Vec<u32> = paginate(
            move |cursor: Option<Cursor>| {
                log.lock().unwrap().push(cursor.clone());
                let index = match cursor.as_ref().map(|c| c.value.as_str()) {
                    None => 0,
                    Some("a") => 1,
                    Some(_) => 2,
                };
                async move { Ok::<_, Error>(pages()[index].clone()) }
            },
            "Marker",
            |page: &Page| page.1.map(str::to_string),
            |page: Page| page.0,
        )
        .try_collect()
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], None);
        assert_eq!(
            seen[1],
            Some(Cursor {
                param: "Marker".to_string(),
                value: "a".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_paginate_stops_after_error() {
        let mut calls = 0;
        let results: Vec<Result<u32>> = paginate(
            |cursor: Option<Cursor>| {
                calls += 1;
                async move {
                    match cursor {
                        None => Ok((vec![1], Some("next".to_string()))),
                        Some(_) => Err(Error::Network("boom".to_string())),
                    }
                }
            },
            "Marker",
            |page: &(Vec<u32>, Option<String>)| page.1.clone(),
            |page: (Vec<u32>, Option<String>)| page.0,
        )
        .collect()
        .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Ok(1)));
        assert!(matches!(results[1], Err(Error::Network(_))));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_paginate_is_lazy() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let stream = paginate(
            move |_cursor: Option<Cursor>| {
                *counter.lock().unwrap() += 1;
                async { Ok::<_, Error>((vec![1u32, 2], Some("more".to_string()))) }
            },
            "Marker",
            |page: &(Vec<u32>, Option<String>)| page.1.clone(),
            |page: (Vec<u32>, Option<String>)| page.0,
        );

        let first_three: Vec<_> = stream.take(3).collect().await;
        assert_eq!(first_three.len(), 3);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_objects_retries_pages() {
        let mut store = MockObjectStore::new();
        let mut seq = mockall::Sequence::new();

        store
            .expect_list_page()
            .withf(|bucket, prefix, cursor| {
                bucket.to_string() == "src" && prefix.as_deref() == Some("logs/") && cursor.is_none()
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(ListPage {
                    objects: vec![ObjectInfo::new("logs/a", 1), ObjectInfo::new("logs/b", 2)],
                    next_cursor: Some("t1".to_string()),
                })
            });
        store
            .expect_list_page()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(Error::Network("503 Slow Down".to_string())));
        store
            .expect_list_page()
            .withf(|_, _, cursor| cursor.as_deref() == Some("t1"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(ListPage {
                    objects: vec![ObjectInfo::new("logs/c", 3)],
                    next_cursor: None,
                })
            });

        let backoff = StepBackoff::default();
        let keys: Vec<String> = list_objects(&store, "src", Some("logs/"), &backoff)
            .map_ok(|o| o.key)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(keys, vec!["logs/a", "logs/b", "logs/c"]);
    }

    #[tokio::test]
    async fn test_list_objects_surfaces_fatal_errors() {
        let mut store = MockObjectStore::new();
        store
            .expect_list_page()
            .times(1)
            .returning(|bucket, _, _| Err(Error::NotFound(bucket.to_string())));

        let backoff = StepBackoff::default();
        let results: Vec<_> = list_objects(&store, "missing", None, &backoff).collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(Error::NotFound(_))));
    }
}
