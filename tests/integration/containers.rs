mod common;
use common::run;

#[test]
fn append_then_iterate_keeps_append_order() {
    let src = "\
def build():
    xs = []
    for i in range(5):
        xs.append(i * i)
    out = []
    for x in xs:
        out.append(x + 1)
    return out

print(build())
";
    assert_eq!(run(src), "[1, 2, 5, 10, 17]\n");
}

#[test]
fn set_then_get_yields_last_value() {
    let src = "\
def store():
    d = {}
    d['k'] = 1
    d['j'] = 5
    d['k'] = 2
    return d['k']

print(store())
";
    assert_eq!(run(src), "2\n");
}

#[test]
fn removed_key_is_no_longer_contained() {
    let src = "\
def prune():
    d = {'a': 1, 'b': 2}
    del d['a']
    return 'a' in d, 'b' in d, len(d)

print(prune())
";
    assert_eq!(run(src), "(False, True, 1)\n");
}

#[test]
fn dictionaries_iterate_in_insertion_order() {
    let src = "\
def walk():
    d = {}
    d['z'] = 1
    d['a'] = 2
    d['m'] = 3
    d['a'] = 4
    keys = []
    for k, v in d.items():
        keys.append(k + str(v))
    return keys

print(walk())
";
    assert_eq!(run(src), "['z1', 'a4', 'm3']\n");
}

#[test]
fn lists_are_shared_between_handles() {
    let src = "\
def grow(xs):
    xs.append(4)

def main():
    a = [1, 2, 3]
    b = a
    grow(b)
    return len(a)

print(main())
";
    assert_eq!(run(src), "4\n");
}

#[test]
fn list_methods_follow_the_runtime_library() {
    let src = "\
def ops():
    xs = [3, 1, 2]
    xs.sort()
    xs.insert(0, 9)
    xs.remove(2)
    last = xs.pop()
    xs.extend([7, 7])
    return xs, last, xs.index(1), xs.count(7)

print(ops())
";
    assert_eq!(run(src), "([9, 1, 7, 7], 3, 1, 2)\n");
}

#[test]
fn dictionary_methods_follow_the_runtime_library() {
    let src = "\
def ops():
    d = {'a': 1}
    d.setdefault('b', 2)
    v = d.get('c', 0)
    p = d.pop('a')
    d.update({'c': 3})
    return sorted(d.keys()), v, p, len(d)

print(ops())
";
    assert_eq!(run(src), "(['b', 'c'], 0, 1, 2)\n");
}

#[test]
fn sets_track_membership() {
    let src = "\
def uniq(xs):
    seen = set()
    out = []
    for x in xs:
        if x not in seen:
            seen.add(x)
            out.append(x)
    return out

print(uniq([1, 2, 1, 3, 2]))
";
    assert_eq!(run(src), "[1, 2, 3]\n");
}
